/// Argument extraction from a raw tool-call response.
///
/// The retry here re-validates the *same* response with a fixed delay; it never
/// asks the model again. Callers that want a fresh completion (the planner)
/// run their own loop around `invoke`.
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::RouterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRetry {
    pub max_retries: u32,
    pub delay: Duration,
}

impl ExtractionRetry {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delay,
        }
    }

    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO)
    }
}

impl Default for ExtractionRetry {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallIssue {
    MissingToolCalls,
    InvalidToolCalls,
    MissingFunction,
    MissingArguments,
    InvalidJson,
}

impl fmt::Display for ToolCallIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ToolCallIssue::MissingToolCalls => "No tool_calls found in response",
            ToolCallIssue::InvalidToolCalls => "Invalid tool_calls format",
            ToolCallIssue::MissingFunction => "No function data in tool call",
            ToolCallIssue::MissingArguments => "No arguments found in function call",
            ToolCallIssue::InvalidJson => "Arguments are not valid JSON",
        };
        f.write_str(text)
    }
}

/// Single validation pass over a normalized raw response.
pub fn validate_tool_call(response: &Value) -> Result<Value, ToolCallIssue> {
    let tool_calls = response
        .get("message")
        .and_then(|message| message.get("tool_calls"))
        .filter(|calls| !calls.is_null())
        .ok_or(ToolCallIssue::MissingToolCalls)?;

    let first = tool_calls
        .as_array()
        .and_then(|calls| calls.first())
        .ok_or(ToolCallIssue::InvalidToolCalls)?;

    let function = first
        .get("function")
        .filter(|function| function.is_object())
        .ok_or(ToolCallIssue::MissingFunction)?;

    let arguments = function
        .get("arguments")
        .filter(|arguments| !arguments.is_null())
        .ok_or(ToolCallIssue::MissingArguments)?;

    match arguments {
        Value::String(encoded) => {
            serde_json::from_str::<Value>(encoded).map_err(|_| ToolCallIssue::InvalidJson)
        }
        other => Ok(other.clone()),
    }
}

pub async fn extract_arguments(
    response: &Value,
    retry: &ExtractionRetry,
) -> Result<Value, RouterError> {
    let max_retries = retry.max_retries.max(1);
    let mut attempt = 0;
    loop {
        match validate_tool_call(response) {
            Ok(arguments) => return Ok(arguments),
            Err(issue) => {
                attempt += 1;
                if attempt >= max_retries {
                    tracing::error!(
                        attempts = max_retries,
                        reason = %issue,
                        "tool call validation failed"
                    );
                    return Err(RouterError::ToolCallValidation {
                        reason: issue.to_string(),
                    });
                }
                tracing::warn!(
                    attempt,
                    max_retries,
                    reason = %issue,
                    delay_ms = retry.delay.as_millis() as u64,
                    "tool call validation failed, retrying"
                );
                if !retry.delay.is_zero() {
                    tokio::time::sleep(retry.delay).await;
                }
            }
        }
    }
}
