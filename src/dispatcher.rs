/// Task dispatcher: runs a validated plan step by step against the registry.
///
/// Every step yields exactly one envelope, in plan order. A failing step is
/// recorded and the remaining steps still run.
use serde::Serialize;
use serde_json::json;

use crate::envelope::Envelope;
use crate::error::RouterError;
use crate::model::{ChatModel, ExtractionRetry, Invocation, invoke};
use crate::planner::{Plan, PlannedStep};
use crate::registry::{Agent, AgentRegistry};
use crate::telemetry::TelemetrySink;

pub const MODEL_RESPONSE_FAILURE: &str = "Failed to process model response";

/// Envelope tagged with the step it came from, for display and telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step_number: u32,
    pub agent: String,
    pub envelope: Envelope,
}

pub struct TaskDispatcher<'a> {
    model: &'a dyn ChatModel,
    registry: &'a AgentRegistry,
    retry: ExtractionRetry,
    telemetry: Option<&'a TelemetrySink>,
}

impl<'a> TaskDispatcher<'a> {
    pub fn new(model: &'a dyn ChatModel, registry: &'a AgentRegistry, retry: ExtractionRetry) -> Self {
        Self {
            model,
            registry,
            retry,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: &'a TelemetrySink) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Execute every step sequentially; `is_async` never reorders execution.
    pub async fn route(&self, plan: &Plan) -> Vec<StepOutcome> {
        let mut outcomes = Vec::with_capacity(plan.len());
        for step in &plan.steps {
            let envelope = self.dispatch_step(step).await;
            self.record(step, &envelope);
            outcomes.push(StepOutcome {
                step_number: step.step_number,
                agent: step.agent.clone(),
                envelope,
            });
        }
        outcomes
    }

    async fn dispatch_step(&self, step: &PlannedStep) -> Envelope {
        let Some(agent) = self.registry.get(&step.agent) else {
            let err = RouterError::AgentNotFound {
                name: step.agent.clone(),
            };
            tracing::error!(agent = %step.agent, step = step.step_number, "agent not found in registry");
            return Envelope::failure(err.to_string());
        };

        tracing::info!(
            agent = %step.agent,
            step = step.step_number,
            is_async = step.is_async,
            expected_output = %step.expected_output,
            "routing task to agent"
        );

        match self.execute(agent.as_ref(), step).await {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::error!(agent = %step.agent, step = step.step_number, error = %err, "step failed");
                match err {
                    RouterError::ToolCallValidation { .. } => Envelope::failure(MODEL_RESPONSE_FAILURE),
                    other => Envelope::failure(other.to_string()),
                }
            }
        }
    }

    async fn execute(&self, agent: &dyn Agent, step: &PlannedStep) -> Result<Envelope, RouterError> {
        let descriptor = agent.descriptor();
        let invocation = invoke(
            self.model,
            &descriptor.system_prompt,
            &step.task,
            Some(&descriptor.input_schema),
            &self.retry,
        )
        .await?;

        let arguments = match invocation {
            Invocation::Arguments(arguments) if arguments.is_object() => arguments,
            Invocation::Arguments(_) | Invocation::Text(_) => {
                return Ok(Envelope::failure(MODEL_RESPONSE_FAILURE));
            }
        };

        let envelope = agent
            .execute(arguments)
            .await
            .map_err(|err| RouterError::HandlerExecution {
                agent: descriptor.name.clone(),
                reason: format!("{err:#}"),
            })?;
        tracing::info!(agent = %descriptor.name, success = envelope.is_success(), "agent execution finished");
        Ok(envelope)
    }

    fn record(&self, step: &PlannedStep, envelope: &Envelope) {
        let Some(telemetry) = self.telemetry else {
            return;
        };
        let event = if envelope.is_success() {
            "step.succeeded"
        } else {
            "step.failed"
        };
        telemetry.emit(
            event,
            json!({
                "step_number": step.step_number,
                "agent": step.agent,
                "error": envelope.error(),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::model::ToolSpec;
    use crate::model::mock::ScriptedModel;
    use crate::registry::AgentDescriptor;

    struct CountingAgent {
        descriptor: AgentDescriptor,
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingAgent {
        fn new(name: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                descriptor: AgentDescriptor {
                    name: name.to_string(),
                    description: "counts calls".to_string(),
                    system_prompt: format!("You are {name}."),
                    input_schema: ToolSpec::new("count", "Count", json!({"type": "object"})),
                    output_schema: json!({}),
                },
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl Agent for CountingAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn execute(&self, arguments: Value) -> anyhow::Result<Envelope> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow::anyhow!("disk full"));
            }
            Ok(Envelope::success(arguments))
        }
    }

    fn step(number: u32, task: &str, agent: &str, is_async: bool) -> PlannedStep {
        PlannedStep {
            step_number: number,
            task: task.to_string(),
            agent: agent.to_string(),
            expected_output: String::new(),
            is_async,
        }
    }

    #[tokio::test]
    async fn outcomes_follow_plan_order_regardless_of_async_flag() {
        let counter = CountingAgent::new("counter", false);
        let mut registry = AgentRegistry::new();
        registry.add(counter.clone()).unwrap();
        let model = ScriptedModel::new()
            .with_tool_call("count", json!({"n": 1}))
            .with_tool_call("count", json!({"n": 2}))
            .with_tool_call("count", json!({"n": 3}));
        let plan = Plan {
            steps: vec![
                step(1, "one", "counter", true),
                step(2, "two", "counter", false),
                step(3, "three", "counter", true),
            ],
        };

        let outcomes = TaskDispatcher::new(&model, &registry, ExtractionRetry::immediate(1))
            .route(&plan)
            .await;
        assert_eq!(outcomes.len(), 3);
        for (index, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.step_number, index as u32 + 1);
            assert_eq!(
                outcome.envelope.result(),
                Some(&json!({"n": index + 1}))
            );
        }
        let requests = model.requests();
        assert_eq!(requests[0].system, "You are counter.");
        assert_eq!(requests[1].user, "two");
        assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn missing_agent_does_not_abort_the_plan() {
        let counter = CountingAgent::new("counter", false);
        let mut registry = AgentRegistry::new();
        registry.add(counter.clone()).unwrap();
        let model = ScriptedModel::new().with_tool_call("count", json!({"n": 2}));
        let plan = Plan {
            steps: vec![step(1, "one", "ghost_agent", false), step(2, "two", "counter", false)],
        };

        let outcomes = TaskDispatcher::new(&model, &registry, ExtractionRetry::immediate(1))
            .route(&plan)
            .await;
        assert_eq!(
            outcomes[0].envelope,
            Envelope::failure("Agent 'ghost_agent' not found")
        );
        assert!(outcomes[1].envelope.is_success());
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn unusable_model_response_is_a_step_failure() {
        let counter = CountingAgent::new("counter", false);
        let mut registry = AgentRegistry::new();
        registry.add(counter.clone()).unwrap();
        let model = ScriptedModel::new()
            .with_text("I cannot do that")
            .with_tool_call("count", json!(["not", "an", "object"]));
        let plan = Plan {
            steps: vec![step(1, "one", "counter", false), step(2, "two", "counter", false)],
        };

        let outcomes = TaskDispatcher::new(&model, &registry, ExtractionRetry::immediate(2))
            .route(&plan)
            .await;
        assert_eq!(outcomes[0].envelope, Envelope::failure(MODEL_RESPONSE_FAILURE));
        assert_eq!(outcomes[1].envelope, Envelope::failure(MODEL_RESPONSE_FAILURE));
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_faults_are_contained_at_the_step_boundary() {
        let broken = CountingAgent::new("broken", true);
        let counter = CountingAgent::new("counter", false);
        let mut registry = AgentRegistry::new();
        registry.add(broken).unwrap();
        registry.add(counter).unwrap();
        let model = ScriptedModel::new()
            .with_tool_call("count", json!({}))
            .with_tool_call("count", json!({}));
        let plan = Plan {
            steps: vec![step(1, "one", "broken", false), step(2, "two", "counter", false)],
        };

        let outcomes = TaskDispatcher::new(&model, &registry, ExtractionRetry::immediate(1))
            .route(&plan)
            .await;
        assert_eq!(
            outcomes[0].envelope,
            Envelope::failure("Error executing task: disk full")
        );
        assert!(outcomes[1].envelope.is_success());
    }

    #[tokio::test]
    async fn provider_errors_become_step_failures() {
        let counter = CountingAgent::new("counter", false);
        let mut registry = AgentRegistry::new();
        registry.add(counter).unwrap();
        let model = ScriptedModel::new();
        let plan = Plan {
            steps: vec![step(1, "one", "counter", false)],
        };

        let outcomes = TaskDispatcher::new(&model, &registry, ExtractionRetry::immediate(1))
            .route(&plan)
            .await;
        assert_eq!(
            outcomes[0].envelope.error(),
            Some("model provider error (scripted): no scripted response left")
        );
    }
}
