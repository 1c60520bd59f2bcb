//! Ollama sidecar client
//!
//! The sidecar speaks an OpenAI-adjacent dialect: tool-call arguments are
//! plain objects rather than JSON strings, and `tool_choice` is not honored
//! natively. `required` and specific-function choices are emulated by
//! appending a short directive to the last user message.

use super::error::LlmError;
use super::types::{ChatMessage, ChatResponse, Role, TokenUsage, ToolChoice};
use super::LlmClient;
use crate::config::Backend;
use crate::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

const CHAT_TIMEOUT: Duration = Duration::from_secs(600);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OllamaClient {
    client: Client,
    host: String,
    model: String,
}

impl OllamaClient {
    pub fn new(host: &str, model: String) -> Self {
        let client = Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f32,
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let mut translated = translate_messages(messages);

        if !tools.is_empty() {
            match &tool_choice {
                ToolChoice::Required => inject_directive(&mut translated, None),
                ToolChoice::Function(name) => inject_directive(&mut translated, Some(name)),
                ToolChoice::Auto | ToolChoice::None => {}
            }
        }

        let mut payload = json!({
            "model": self.model,
            "messages": translated,
            "stream": false,
            "options": {
                "temperature": temperature,
            },
        });

        // `none` is emulated by omitting the tool schemas entirely
        if !tools.is_empty() && tool_choice != ToolChoice::None {
            payload["tools"] = json!(tools
                .iter()
                .map(ToolDefinition::to_function_schema)
                .collect::<Vec<_>>());
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        let data: Value = response.json().await?;
        Ok(parse_response(&data))
    }

    /// Available when the sidecar answers `/api/tags` and our model (or a
    /// tag of it) is in the list.
    async fn is_available(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        let Ok(response) = result else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        let Ok(data) = response.json::<Value>().await else {
            return false;
        };

        data["models"]
            .as_array()
            .is_some_and(|models| {
                models.iter().any(|m| {
                    m["name"]
                        .as_str()
                        .is_some_and(|name| name.contains(&self.model) || self.model.contains(name))
                })
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> Backend {
        Backend::Ollama
    }
}

fn translate_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let mut m = json!({
                "role": msg.role.as_str(),
                "content": msg.content.clone().unwrap_or_default(),
            });

            if let Some(calls) = &msg.tool_calls {
                m["tool_calls"] = json!(calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                // Ollama expects an object, not a JSON string
                                "arguments": Value::Object(tc.arguments.clone()),
                            },
                        })
                    })
                    .collect::<Vec<_>>());
            }

            if msg.role == Role::Tool {
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
            }

            m
        })
        .collect()
}

/// Append a forcing directive to the last user message. With `tool_name` the
/// directive demands that specific call, otherwise any tool call.
pub(crate) fn inject_directive(messages: &mut [Value], tool_name: Option<&str>) {
    for msg in messages.iter_mut().rev() {
        if msg["role"] == "user" {
            let original = msg["content"].as_str().unwrap_or("").to_string();
            let directive = match tool_name {
                Some(name) => format!(
                    "[INSTRUCTION: You MUST call the {name} tool. \
                     Do not write any text. Only output the tool call.]"
                ),
                None => "[INSTRUCTION: You MUST respond with a tool call. \
                         Do not write any text explanation. Only output a tool call.]"
                    .to_string(),
            };
            msg["content"] = json!(format!("{original}\n\n{directive}"));
            return;
        }
    }
}

fn parse_response(data: &Value) -> ChatResponse {
    let message = &data["message"];

    let tool_calls = message["tool_calls"].as_array().map(|calls| {
        calls
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                let func = &tc["function"];
                let arguments = match &func["arguments"] {
                    Value::Object(map) => map.clone(),
                    Value::String(s) => serde_json::from_str::<Value>(s)
                        .ok()
                        .and_then(|v| v.as_object().cloned())
                        .unwrap_or_default(),
                    _ => Map::new(),
                };
                ToolCall {
                    id: tc["id"]
                        .as_str()
                        .map_or_else(|| format!("call_{i}"), str::to_string),
                    name: func["name"].as_str().unwrap_or("").to_string(),
                    arguments,
                }
            })
            .collect::<Vec<_>>()
    });

    let usage = Some(TokenUsage {
        prompt_tokens: data["prompt_eval_count"].as_i64().unwrap_or(0),
        completion_tokens: data["eval_count"].as_i64().unwrap_or(0),
    });

    ChatResponse {
        message: ChatMessage {
            role: Role::Assistant,
            content: message["content"].as_str().map(str::to_string),
            tool_calls,
            tool_call_id: None,
            name: None,
        },
        finish_reason: data["done_reason"].as_str().map(str::to_string),
        usage,
    }
}
