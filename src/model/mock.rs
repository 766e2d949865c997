/// Scripted model that replays canned raw responses and records requests.
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Value, json};

use super::{ChatModel, ChatRequest, TextStream};
use crate::error::RouterError;

#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Value>>,
    stream_chunks: Vec<String>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw response (canonical `{"message": ...}` shape).
    pub fn with_response(self, response: Value) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    /// Queue a response proposing one tool call with the given arguments.
    pub fn with_tool_call(self, name: &str, arguments: Value) -> Self {
        self.with_response(tool_call_response(name, arguments))
    }

    pub fn with_text(self, text: &str) -> Self {
        self.with_response(json!({ "message": { "role": "assistant", "content": text } }))
    }

    pub fn with_stream(mut self, chunks: &[&str]) -> Self {
        self.stream_chunks = chunks.iter().map(|chunk| chunk.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

pub fn tool_call_response(name: &str, arguments: Value) -> Value {
    json!({
        "message": {
            "role": "assistant",
            "content": "",
            "tool_calls": [{ "function": { "name": name, "arguments": arguments } }]
        }
    })
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<Value, RouterError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| RouterError::provider("scripted", "no scripted response left"))
    }

    async fn stream(&self, _message: &str) -> Result<TextStream, RouterError> {
        let chunks = self
            .stream_chunks
            .clone()
            .into_iter()
            .map(Ok)
            .collect::<Vec<anyhow::Result<String>>>();
        Ok(stream::iter(chunks).boxed())
    }
}
