use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Value, json};

use super::{ChatModel, ChatRequest, TextStream, http_client, line_stream};
use crate::error::RouterError;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Ollama `/api/chat` adapter. Its response body is already the canonical raw shape.
pub struct OllamaModel {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaModel {
    pub fn new(host: &str, model: &str, timeout: Duration) -> Result<Self, RouterError> {
        Ok(Self {
            client: http_client(timeout)?,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.host)
    }

    fn error(&self, message: impl Into<String>) -> RouterError {
        RouterError::provider("ollama", message)
    }
}

pub(crate) fn parse_ndjson_line(line: &str) -> anyhow::Result<Option<String>> {
    let value = serde_json::from_str::<Value>(line).context("invalid ollama stream line")?;
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(anyhow::anyhow!("ollama stream error: {message}"));
    }
    Ok(value
        .pointer("/message/content")
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[async_trait]
impl ChatModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Value, RouterError> {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages(),
            "stream": false,
        });
        if let Some(tool) = &request.tool {
            body["tools"] = json!([tool.as_tool()]);
        }

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|err| self.error(format!("request to {} failed: {err}", self.endpoint())))?;

        let status = response.status();
        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| self.error(format!("invalid response body: {err}")))?;

        if !status.is_success() {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(self.error(format!("HTTP {status}: {message}")));
        }

        Ok(payload)
    }

    async fn stream(&self, message: &str) -> Result<TextStream, RouterError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": message }],
            "stream": true,
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|err| self.error(format!("request to {} failed: {err}", self.endpoint())))?;

        if !response.status().is_success() {
            return Err(self.error(format!("HTTP {}", response.status())));
        }

        Ok(line_stream(response.bytes_stream(), parse_ndjson_line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_lines_yield_message_content() {
        let line = r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#;
        assert_eq!(parse_ndjson_line(line).unwrap().as_deref(), Some("Hel"));
        let done = r#"{"done":true}"#;
        assert_eq!(parse_ndjson_line(done).unwrap(), None);
    }

    #[test]
    fn ndjson_error_lines_fail_the_stream() {
        assert!(parse_ndjson_line(r#"{"error":"model not found"}"#).is_err());
    }

    #[test]
    fn host_trailing_slash_is_trimmed() {
        let model = OllamaModel::new("http://gpu-box:11434/", "llama3.1", Duration::from_secs(5))
            .expect("client should build");
        assert_eq!(model.endpoint(), "http://gpu-box:11434/api/chat");
    }
}
