/// Model invocation boundary.
///
/// Adapters normalize provider payloads into one raw shape,
/// `{"message": {"content": ..., "tool_calls": [{"function": {"name", "arguments"}}]}}`,
/// so the rest of the pipeline never branches on provider.
pub mod arguments;
pub mod mock;
pub mod ollama;
pub mod openai;

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::RouterError;
pub use arguments::{ExtractionRetry, ToolCallIssue, extract_arguments, validate_tool_call};

pub type TextStream = BoxStream<'static, Result<String>>;

/// Function descriptor handed to the model as its single callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }

    /// Build a descriptor whose parameters are the JSON schema of `T`.
    pub fn for_type<T: JsonSchema>(name: &str, description: &str) -> Self {
        Self::new(name, description, parameters_schema::<T>())
    }

    pub fn as_tool(&self) -> Value {
        json!({ "type": "function", "function": self })
    }
}

/// JSON schema for `T` with nested types inlined, suitable for tool parameters.
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let generator = schemars::r#gen::SchemaSettings::draft07()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.option_add_null_type = false;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| json!({"type": "object"}));
    if let Some(map) = value.as_object_mut() {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
    }
    value
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub tool: Option<ToolSpec>,
}

impl ChatRequest {
    pub fn messages(&self) -> Vec<Value> {
        vec![
            json!({ "role": "system", "content": self.system }),
            json!({ "role": "user", "content": self.user }),
        ]
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// One blocking completion; returns the normalized raw response.
    async fn chat(&self, request: &ChatRequest) -> Result<Value, RouterError>;

    /// Plain conversational completion delivered as incremental text chunks.
    async fn stream(&self, message: &str) -> Result<TextStream, RouterError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Text(String),
    Arguments(Value),
}

/// Call the model once. With a tool, the response must carry a well-formed
/// tool call and its arguments are returned; without one, the reply text is.
pub async fn invoke(
    model: &dyn ChatModel,
    system: &str,
    user: &str,
    tool: Option<&ToolSpec>,
    retry: &ExtractionRetry,
) -> Result<Invocation, RouterError> {
    let request = ChatRequest {
        system: system.to_string(),
        user: user.to_string(),
        tool: tool.cloned(),
    };
    let raw = model.chat(&request).await?;
    tracing::debug!(model = model.name(), response = %raw, "model response");

    if tool.is_some() {
        let arguments = extract_arguments(&raw, retry).await?;
        return Ok(Invocation::Arguments(arguments));
    }

    let text = raw
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Invocation::Text(text))
}

/// Drain a text stream, handing each chunk to `on_chunk`, and return the full text.
pub async fn collect_stream(
    mut chunks: TextStream,
    mut on_chunk: impl FnMut(&str),
) -> Result<String> {
    let mut out = String::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        on_chunk(&chunk);
        out.push_str(&chunk);
    }
    Ok(out)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, RouterError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| RouterError::provider("http", format!("failed to create HTTP client: {err}")))
}

type LineParser = fn(&str) -> Result<Option<String>>;

struct LineState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    ready: VecDeque<Result<String>>,
    parse: LineParser,
    finished: bool,
}

impl<S> LineState<S> {
    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match (self.parse)(line) {
            Ok(Some(text)) => self.ready.push_back(Ok(text)),
            Ok(None) => {}
            Err(err) => self.ready.push_back(Err(err)),
        }
    }

    fn drain_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<u8>>();
            self.push_line(&line);
        }
    }
}

/// Turn a newline-delimited HTTP body into text chunks using `parse` per line.
pub(crate) fn line_stream<S, B>(body: S, parse: LineParser) -> TextStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(body),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        parse,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(bytes.as_ref());
                    state.drain_complete_lines();
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(anyhow::anyhow!("model stream error: {err}")), state));
                }
                None => {
                    state.finished = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_line(&rest);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Probe {
        /// Name of the probe.
        label: String,
        count: Option<u32>,
    }

    #[test]
    fn parameters_schema_is_a_plain_object_schema() {
        let schema = parameters_schema::<Probe>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["required"], json!(["label"]));
        assert_eq!(schema["properties"]["label"]["description"], "Name of the probe.");
    }

    #[test]
    fn tool_spec_wraps_as_function_tool() {
        let spec = ToolSpec::new("route_query", "Route it", json!({"type": "object"}));
        let tool = spec.as_tool();
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "route_query");
    }

    #[tokio::test]
    async fn line_stream_splits_across_chunk_boundaries() {
        let body = stream::iter(vec![
            Ok::<_, reqwest::Error>(b"alpha\nbe".to_vec()),
            Ok(b"ta\n\ngam".to_vec()),
            Ok(b"ma".to_vec()),
        ]);
        let parse: LineParser = |line| Ok(Some(line.to_uppercase()));
        let chunks = line_stream(body, parse);
        let text = collect_stream(chunks, |_| {}).await.expect("stream should collect");
        assert_eq!(text, "ALPHABETAGAMMA");
    }
}
