/// Query router: binary conversational/tool classification of a user message.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RouterError;
use crate::model::{ChatModel, ExtractionRetry, Invocation, ToolSpec, invoke};

pub const ROUTE_TOOL_NAME: &str = "route_query";

const ROUTER_SYSTEM_PROMPT: &str = "\
You are an intelligent assistant capable of routing queries.
If the user's query is conversational, route it to the conversational agent.
If it requires an action, route it to the tool agent.
Always answer by calling the route_query function.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentClass {
    Conversational,
    Tool,
}

impl AgentClass {
    pub fn label(self) -> &'static str {
        match self {
            AgentClass::Conversational => "conversational",
            AgentClass::Tool => "tool",
        }
    }
}

/// Outcome of one routing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RoutingDecision {
    /// Type of the agent: conversational, tool.
    #[serde(alias = "agent")]
    pub agent_class: AgentClass,
}

pub fn route_tool() -> ToolSpec {
    ToolSpec::for_type::<RoutingDecision>(ROUTE_TOOL_NAME, "Route the query to a specific agent")
}

pub async fn route(
    model: &dyn ChatModel,
    message: &str,
    retry: &ExtractionRetry,
) -> Result<RoutingDecision, RouterError> {
    tracing::info!("routing message");
    let tool = route_tool();
    let invocation = invoke(model, ROUTER_SYSTEM_PROMPT, message, Some(&tool), retry)
        .await
        .map_err(|err| match err {
            RouterError::ToolCallValidation { reason } => RouterError::Routing { reason },
            other => other,
        })?;

    let arguments = match invocation {
        Invocation::Arguments(arguments) => arguments,
        Invocation::Text(_) => {
            return Err(RouterError::Routing {
                reason: "model answered in free text".to_string(),
            });
        }
    };

    let decision = parse_decision(&arguments)?;
    tracing::info!(agent_class = decision.agent_class.label(), "message routed");
    Ok(decision)
}

fn parse_decision(arguments: &Value) -> Result<RoutingDecision, RouterError> {
    serde_json::from_value::<RoutingDecision>(arguments.clone()).map_err(|err| {
        RouterError::Routing {
            reason: format!("invalid class label in {arguments}: {err}"),
        }
    })
}
