use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header;
use serde_json::{Value, json};

use super::{ChatModel, ChatRequest, TextStream, http_client, line_stream};
use crate::error::RouterError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions adapter.
pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, RouterError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn error(&self, message: impl Into<String>) -> RouterError {
        RouterError::provider("openai", message)
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, RouterError> {
        let mut request = self.client.post(self.endpoint()).json(body);
        if !self.api_key.is_empty() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", self.api_key));
        }
        let response = request
            .send()
            .await
            .map_err(|err| self.error(format!("request to {} failed: {err}", self.endpoint())))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|payload| {
                payload
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown error".to_string());
        Err(self.error(format!("HTTP {status}: {message}")))
    }
}

/// Lift `choices[0].message` into the canonical `{"message": ...}` shape.
pub(crate) fn normalize_completion(payload: &Value) -> Option<Value> {
    let message = payload.pointer("/choices/0/message")?;
    Some(json!({ "message": message }))
}

pub(crate) fn parse_sse_line(line: &str) -> anyhow::Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(None);
    }
    let value = serde_json::from_str::<Value>(data).context("invalid openai stream event")?;
    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Value, RouterError> {
        let mut body = json!({
            "model": self.model,
            "messages": request.messages(),
        });
        if let Some(tool) = &request.tool {
            body["tools"] = json!([tool.as_tool()]);
        }

        let payload = self
            .post(&body)
            .await?
            .json::<Value>()
            .await
            .map_err(|err| self.error(format!("invalid response body: {err}")))?;

        normalize_completion(&payload)
            .ok_or_else(|| self.error("response did not contain choices[0].message"))
    }

    async fn stream(&self, message: &str) -> Result<TextStream, RouterError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": message }],
            "stream": true,
        });
        let response = self.post(&body).await?;
        Ok(line_stream(response.bytes_stream(), parse_sse_line))
    }
}
