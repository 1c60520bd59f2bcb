//! Scripted LLM client for exercising the router and the agent loop

use super::error::LlmError;
use super::types::{ChatMessage, ChatResponse, Role, TokenUsage, ToolChoice};
use super::LlmClient;
use crate::config::Backend;
use crate::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// One observed `chat` invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub message_count: usize,
    pub tool_choice: ToolChoice,
}

/// An `LlmClient` that replays a fixed script of responses.
///
/// Scripted responses are consumed in order; once the script is exhausted the
/// fallback response repeats forever (useful for loop-bound tests).
pub struct ScriptedClient {
    backend: Backend,
    model: String,
    available: AtomicBool,
    script: Mutex<VecDeque<ChatResponse>>,
    fallback: ChatResponse,
    calls: Mutex<Vec<RecordedCall>>,
    fail_with: Mutex<Option<String>>,
}

impl ScriptedClient {
    pub fn text(backend: Backend, model: &str, text: &str) -> Self {
        Self {
            backend,
            model: model.to_string(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: text_response(text),
            calls: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub fn push_text(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(text_response(text));
        self
    }

    #[must_use]
    pub fn push_tool_call(self, id: &str, tool: &str, args: Value) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(tool_call_response(id, tool, args));
        self
    }

    /// Every subsequent chat call fails with this message
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _temperature: f32,
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            message_count: messages.len(),
            tool_choice,
        });

        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(LlmError::server_error(message));
        }

        let scripted = self.script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> Backend {
        self.backend
    }
}

pub fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        message: ChatMessage::assistant(Some(text.to_string()), None),
        finish_reason: Some("stop".to_string()),
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        }),
    }
}

pub fn tool_call_response(id: &str, tool: &str, args: Value) -> ChatResponse {
    ChatResponse {
        message: ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: id.to_string(),
                name: tool.to_string(),
                arguments: args.as_object().cloned().unwrap_or_default(),
            }]),
            tool_call_id: None,
            name: None,
        },
        finish_reason: Some("tool_calls".to_string()),
        usage: Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        }),
    }
}
