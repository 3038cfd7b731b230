//! Model client abstraction
//!
//! The orchestrator talks to the language model through [`ModelClient`], so the
//! Gemini client and the scripted test double are interchangeable.

use crate::error::OrchestrationError;
use crate::memory::{ToolCallRecord, ToolResponseRecord};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Schema of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Base64 encoded bytes.
    InlineData { mime_type: String, data: String },
    FunctionCall(ToolCallRecord),
    FunctionResponse(ToolResponseRecord),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<ContentPart>,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system_instruction: String,
    pub contents: Vec<Content>,
    pub tools: Vec<FunctionDeclaration>,
    /// When false the model must answer with text only.
    pub allow_tool_calls: bool,
}

/// A function call as emitted by the model, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub function_calls: Vec<FunctionCall>,
    pub finish_reason: Option<String>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn calls(calls: Vec<(&str, Value)>) -> Self {
        Self {
            function_calls: calls
                .into_iter()
                .map(|(name, args)| FunctionCall {
                    name: name.to_string(),
                    args,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;
}

/// Replays queued responses in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<ModelResponse>>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ModelResponse) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response));
        }
        self
    }

    pub fn push_error(&self, error: OrchestrationError) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| OrchestrationError::UpstreamModelError("script poisoned".to_string()))?
            .pop_front();

        next.unwrap_or_else(|| {
            Err(OrchestrationError::UpstreamModelError(
                "scripted model has no more responses".to_string(),
            ))
        })
    }
}
