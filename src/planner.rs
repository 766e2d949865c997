/// Task planner: expands a tool-classified message into an ordered list of steps.
///
/// Model output drifts in shape (string-encoded arrays, nested `steps`
/// objects, alternate key names). `normalize_steps` absorbs that at one
/// boundary; `repair_step` fills only the gaps that have a safe fallback;
/// `validate_plan` decides whether the batch is usable. A rejected batch
/// triggers a fresh model call with a corrective instruction appended.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::RouterError;
use crate::model::{ChatModel, ExtractionRetry, Invocation, ToolSpec, invoke};
use crate::registry::AgentDescriptor;
use crate::telemetry::TelemetrySink;

pub const PLAN_TOOL_NAME: &str = "route_agent";
pub const DEFAULT_PLANNER_ATTEMPTS: u32 = 3;

pub const CORRECTIVE_INSTRUCTION: &str = "\n\nPlease use the 'route_agent' function to structure your response, \
ensuring ALL required fields (step_number, task, agent, expected_output, is_async) are included for each step.";

const TASK_KEYS: &[&str] = &["task", "task_description", "description", "instruction"];
const AGENT_KEYS: &[&str] = &["agent", "agent_id", "agent_name"];

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// The step number of the query (starting from 1).
    pub step_number: u32,
    /// Task description the agent needs to complete.
    pub task: String,
    /// The agent responsible for this task.
    pub agent: String,
    /// What output is expected after completion of the task.
    #[serde(default)]
    pub expected_output: Option<String>,
    /// Whether this task could be performed independently of the other steps.
    #[serde(default)]
    pub is_async: Option<bool>,
}

/// Tool parameters the model fills in; wraps the step array.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepList {
    pub steps: Vec<Step>,
}

/// A validated step, with optional fields resolved to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_number: u32,
    pub task: String,
    pub agent: String,
    pub expected_output: String,
    pub is_async: bool,
}

/// Validated, ordered plan for a single message. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlannedStep>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub fn plan_tool() -> ToolSpec {
    ToolSpec::for_type::<StepList>(
        PLAN_TOOL_NAME,
        "Route the query to one or multiple agents, handling single or multi-step tasks.",
    )
}

pub fn render_system_prompt(agents: &[&AgentDescriptor]) -> String {
    let mut roster = String::new();
    for agent in agents {
        roster.push_str(&format!("- {}: {}\n", agent.name, agent.description));
    }
    if roster.is_empty() {
        roster.push_str("- (no agents registered)\n");
    }
    let example_agent = agents
        .first()
        .map(|agent| agent.name.as_str())
        .unwrap_or("example_agent");

    format!(
        "You are an intelligent assistant responsible for routing queries to the appropriate agents.
Analyze the user's request and generate a structured plan using the '{PLAN_TOOL_NAME}' function.
You must always use the '{PLAN_TOOL_NAME}' function to output your response.

For each step, provide ALL of the following information:
- step_number: An integer starting from 1
- task: A detailed description of what the agent needs to do
- agent: The name of the agent responsible for this task, chosen from the list below
- expected_output: What should be produced after completing this task
- is_async: Whether this task can be performed independently of the others (true or false)

Available agents:
{roster}
Example for \"add milk and eggs to my list\":
{{\"steps\": [
  {{\"step_number\": 1, \"task\": \"Add 'milk' to the todo list\", \"agent\": \"{example_agent}\", \"expected_output\": \"The created item\", \"is_async\": false}},
  {{\"step_number\": 2, \"task\": \"Add 'eggs' to the todo list\", \"agent\": \"{example_agent}\", \"expected_output\": \"The created item\", \"is_async\": false}}
]}}

Do not respond in any other format."
    )
}

/// Reduce any accepted response shape to the raw step objects.
pub fn normalize_steps(arguments: &Value) -> Result<Vec<Map<String, Value>>, String> {
    let steps = match arguments {
        Value::Object(map) => map
            .get("steps")
            .ok_or_else(|| "response has no 'steps' field".to_string())?,
        Value::Array(_) => arguments,
        Value::String(_) => arguments,
        other => return Err(format!("unexpected plan payload: {other}")),
    };

    match steps {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(map.clone()),
                other => Err(format!("step {} is not an object: {other}", index + 1)),
            })
            .collect(),
        Value::String(encoded) => {
            let decoded = serde_json::from_str::<Value>(encoded)
                .map_err(|err| format!("'steps' string is not valid JSON: {err}"))?;
            if decoded.is_string() {
                return Err("'steps' is doubly string-encoded".to_string());
            }
            normalize_steps(&decoded)
        }
        Value::Object(_) => normalize_steps(steps),
        other => Err(format!("'steps' has unexpected type: {other}")),
    }
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn step_number(map: &Map<String, Value>) -> Option<Result<u32, String>> {
    let raw = map.get("step_number").filter(|value| !value.is_null())?;
    let parsed = match raw {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    Some(
        parsed
            .and_then(|value| u32::try_from(value).ok())
            .ok_or_else(|| format!("invalid step_number {raw}")),
    )
}

fn flag(map: &Map<String, Value>, key: &str) -> Result<bool, String> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(value)) => Ok(*value),
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            _ => Err(format!("invalid {key} value '{text}'")),
        },
        Some(other) => Err(format!("invalid {key} value {other}")),
    }
}

/// Fill gaps with safe fallbacks. `position` is the 1-based array index.
/// A missing agent is never defaulted.
pub fn repair_step(map: &Map<String, Value>, position: u32) -> Result<PlannedStep, String> {
    let step_number = match step_number(map) {
        Some(parsed) => parsed?,
        None => position,
    };
    let task = first_text(map, TASK_KEYS)
        .ok_or_else(|| format!("step {step_number} is missing 'task'"))?;
    let agent = first_text(map, AGENT_KEYS)
        .ok_or_else(|| format!("step {step_number} is missing 'agent'"))?;
    let expected_output = map
        .get("expected_output")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let is_async = flag(map, "is_async")?;

    Ok(PlannedStep {
        step_number,
        task,
        agent,
        expected_output,
        is_async,
    })
}

/// Order by step number and check the sequence is positive and strictly increasing.
pub fn validate_plan(mut steps: Vec<PlannedStep>) -> Result<Plan, String> {
    if steps.is_empty() {
        return Err("plan contains no steps".to_string());
    }
    steps.sort_by_key(|step| step.step_number);
    if steps[0].step_number != 1 {
        return Err(format!(
            "step numbers must start at 1, got {}",
            steps[0].step_number
        ));
    }
    for pair in steps.windows(2) {
        if pair[0].step_number == pair[1].step_number {
            return Err(format!("duplicate step_number {}", pair[0].step_number));
        }
    }
    Ok(Plan { steps })
}

/// Normalize, repair, and validate one model response.
pub fn parse_plan(arguments: &Value) -> Result<Plan, String> {
    let raw_steps = normalize_steps(arguments)?;
    let repaired = raw_steps
        .iter()
        .enumerate()
        .map(|(index, map)| repair_step(map, index as u32 + 1))
        .collect::<Result<Vec<_>, String>>()?;
    validate_plan(repaired)
}

pub struct TaskPlanner<'a> {
    model: &'a dyn ChatModel,
    retry: ExtractionRetry,
    max_attempts: u32,
    telemetry: Option<&'a TelemetrySink>,
}

impl<'a> TaskPlanner<'a> {
    pub fn new(model: &'a dyn ChatModel, retry: ExtractionRetry, max_attempts: u32) -> Self {
        Self {
            model,
            retry,
            max_attempts: max_attempts.max(1),
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: &'a TelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub async fn generate(
        &self,
        message: &str,
        agents: &[&AgentDescriptor],
    ) -> Result<Plan, RouterError> {
        tracing::info!(agents = agents.len(), "generating tasks");
        let system = render_system_prompt(agents);
        let tool = plan_tool();
        let mut user = message.to_string();
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            match self.attempt(&system, &user, &tool).await {
                Ok(plan) => {
                    tracing::info!(attempt, steps = plan.len(), "tasks generated");
                    self.emit(
                        "plan.generated",
                        json!({ "attempt": attempt, "steps": plan.len() }),
                    );
                    return Ok(plan);
                }
                Err(reason) => {
                    tracing::warn!(attempt, reason = %reason, "planning attempt rejected");
                    self.emit(
                        "plan.attempt.failed",
                        json!({ "attempt": attempt, "reason": reason }),
                    );
                    last_reason = reason;
                }
            }
            user.push_str(CORRECTIVE_INSTRUCTION);
        }

        tracing::error!(attempts = self.max_attempts, reason = %last_reason, "failed to generate valid tasks");
        self.emit(
            "plan.failed",
            json!({ "attempts": self.max_attempts, "reason": last_reason }),
        );
        Err(RouterError::Planning {
            attempts: self.max_attempts,
            reason: last_reason,
        })
    }

    /// One fresh model call plus normalization; the error is the rejection reason.
    async fn attempt(&self, system: &str, user: &str, tool: &ToolSpec) -> Result<Plan, String> {
        match invoke(self.model, system, user, Some(tool), &self.retry).await {
            Ok(Invocation::Arguments(arguments)) => parse_plan(&arguments).inspect_err(|_| {
                tracing::debug!(arguments = %arguments, "rejected plan payload");
            }),
            Ok(Invocation::Text(_)) => Err("model answered in free text".to_string()),
            Err(err) => Err(err.to_string()),
        }
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Some(telemetry) = self.telemetry {
            telemetry.emit(event, payload);
        }
    }
}
