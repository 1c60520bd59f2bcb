//! Anthropic messages API client

use super::error::LlmError;
use super::types::{ChatMessage, ChatResponse, Role, TokenUsage, ToolChoice};
use super::LlmClient;
use crate::config::Backend;
use crate::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const CHAT_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f32,
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let (system, translated) = translate_messages(messages);

        let mut payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": translated,
            "temperature": temperature,
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }
        if !tools.is_empty() {
            payload["tools"] = json!(tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters_schema(),
                    })
                })
                .collect::<Vec<_>>());
            payload["tool_choice"] = tool_choice_value(&tool_choice);
        }

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, &body));
        }

        let data: Value = response.json().await?;
        parse_response(&data)
    }

    async fn is_available(&self) -> bool {
        // No cheap unauthenticated probe exists; credentials are the gate and
        // the router's connectivity check covers reachability.
        !self.api_key.is_empty()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> Backend {
        Backend::Anthropic
    }
}

/// Translate the neutral message log into Anthropic's shape: system messages
/// are hoisted into the top-level `system` field, assistant tool calls become
/// `tool_use` blocks, and tool messages become user-role `tool_result`
/// blocks.
fn translate_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut translated: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                let text = msg.content.clone().unwrap_or_default();
                system = Some(match system.take() {
                    Some(existing) => format!("{existing}\n\n{text}"),
                    None => text,
                });
            }
            Role::User => {
                translated.push(json!({
                    "role": "user",
                    "content": msg.content.clone().unwrap_or_default(),
                }));
            }
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if let Some(content) = &msg.content {
                    if !content.is_empty() {
                        blocks.push(json!({"type": "text", "text": content}));
                    }
                }
                if let Some(calls) = &msg.tool_calls {
                    for tc in calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": Value::Object(tc.arguments.clone()),
                        }));
                    }
                }
                if blocks.is_empty() {
                    blocks.push(json!({"type": "text", "text": ""}));
                }
                translated.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                translated.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content.clone().unwrap_or_default(),
                    }],
                }));
            }
        }
    }

    (system, translated)
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Function(name) => json!({"type": "tool", "name": name}),
    }
}

fn parse_response(data: &Value) -> Result<ChatResponse, LlmError> {
    let blocks = data["content"]
        .as_array()
        .ok_or_else(|| LlmError::unknown("Response contained no content"))?;

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(text) = block["text"].as_str() {
                    if !text.is_empty() {
                        text_parts.push(text);
                    }
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: block["input"].as_object().cloned().unwrap_or_default(),
                });
            }
            _ => {}
        }
    }

    let usage = data.get("usage").map(|u| TokenUsage {
        prompt_tokens: u["input_tokens"].as_i64().unwrap_or(0),
        completion_tokens: u["output_tokens"].as_i64().unwrap_or(0),
    });

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join(""))
    };

    Ok(ChatResponse {
        message: ChatMessage {
            role: Role::Assistant,
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
            name: None,
        },
        finish_reason: data["stop_reason"].as_str().map(str::to_string),
        usage,
    })
}
