/// Failure taxonomy for the routing core plus CLI error rendering.
///
/// Failures that stop a whole message (routing, planning, provider transport)
/// propagate as `RouterError`. Failures local to one plan step are folded into
/// a failed `Envelope` by the dispatcher and never surface here.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("routing failed: {reason}")]
    Routing { reason: String },

    #[error("Final validation error: {reason}")]
    ToolCallValidation { reason: String },

    #[error("planning failed after {attempts} attempts: {reason}")]
    Planning { attempts: u32, reason: String },

    #[error("Agent '{name}' not found")]
    AgentNotFound { name: String },

    #[error("Error executing task: {reason}")]
    HandlerExecution { agent: String, reason: String },

    #[error("agent '{name}' is already registered")]
    DuplicateAgent { name: String },

    #[error("model provider error ({provider}): {message}")]
    Provider { provider: String, message: String },
}

impl RouterError {
    pub fn provider(provider: &str, message: impl Into<String>) -> Self {
        RouterError::Provider {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Provider,
    Routing,
    Planning,
    Tooling,
    Input,
    Internal,
}

impl ErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            ErrorCategory::Provider => "PROVIDER",
            ErrorCategory::Routing => "ROUTING",
            ErrorCategory::Planning => "PLANNING",
            ErrorCategory::Tooling => "TOOLING",
            ErrorCategory::Input => "INPUT",
            ErrorCategory::Internal => "INTERNAL",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            ErrorCategory::Provider => {
                "Check that the model server is reachable (OLLAMA_HOST) or set OPENAI_API_KEY, then retry."
            }
            ErrorCategory::Routing => {
                "The model did not return a conversational/tool label. Retry, or use a model with tool-call support."
            }
            ErrorCategory::Planning => {
                "The model never produced a valid step list. Rephrase the request or raise planner_max_attempts."
            }
            ErrorCategory::Tooling => {
                "Review agent configuration and retry with RUST_LOG=info for detailed dispatch logs."
            }
            ErrorCategory::Input => "Run agent-router --help and correct command arguments.",
            ErrorCategory::Internal => {
                "Retry with RUST_LOG=debug. If it persists, capture logs and open an issue."
            }
        }
    }
}

pub fn categorize_router_error(err: &RouterError) -> ErrorCategory {
    match err {
        RouterError::Routing { .. } => ErrorCategory::Routing,
        RouterError::Planning { .. } => ErrorCategory::Planning,
        RouterError::Provider { .. } => ErrorCategory::Provider,
        RouterError::ToolCallValidation { .. }
        | RouterError::AgentNotFound { .. }
        | RouterError::HandlerExecution { .. }
        | RouterError::DuplicateAgent { .. } => ErrorCategory::Tooling,
    }
}

pub fn categorize_error(err: &anyhow::Error) -> ErrorCategory {
    if let Some(router_err) = err.downcast_ref::<RouterError>() {
        return categorize_router_error(router_err);
    }

    let msg = format!("{err:#}").to_ascii_lowercase();

    // Input patterns run first: config errors quote field names such as `provider`.
    if msg.contains("invalid value")
        || msg.contains("unknown argument")
        || msg.contains("failed to read input")
        || msg.contains("profile")
        || msg.contains("cannot be empty")
    {
        return ErrorCategory::Input;
    }

    if msg.contains("api_key") || msg.contains("provider") || msg.contains("connection") {
        return ErrorCategory::Provider;
    }

    if msg.contains("agent") || msg.contains("todo") || msg.contains("store") {
        return ErrorCategory::Tooling;
    }

    ErrorCategory::Internal
}

pub fn format_cli_error(err: &anyhow::Error) -> String {
    let category = categorize_error(err);
    format!("[{}] {:#}\nHint: {}", category.code(), err, category.hint())
}
