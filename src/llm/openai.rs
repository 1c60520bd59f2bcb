//! OpenAI-compatible chat-completions client
//!
//! Serves OpenAI directly, and xAI and Google's Gemini through their
//! chat-completions compatibility endpoints. On this wire format tool-call
//! arguments travel as a JSON-encoded string; they are decoded back into an
//! object here so the rest of the crate only sees argument maps.

use super::error::LlmError;
use super::types::{ChatMessage, ChatResponse, Role, TokenUsage, ToolChoice};
use super::LlmClient;
use crate::config::Backend;
use crate::tools::{ToolCall, ToolDefinition};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

const CHAT_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub struct OpenAiCompatClient {
    client: Client,
    backend: Backend,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(backend: Backend, base_url: &str, api_key: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(CHAT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            backend,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub fn openai(api_key: String, model: String) -> Self {
        Self::new(Backend::OpenAi, "https://api.openai.com/v1", api_key, model)
    }

    pub fn xai(api_key: String, model: String) -> Self {
        Self::new(Backend::Xai, "https://api.x.ai/v1", api_key, model)
    }

    /// Gemini through Google's chat-completions compatibility endpoint
    pub fn google(api_key: String, model: String) -> Self {
        Self::new(
            Backend::Google,
            "https://generativelanguage.googleapis.com/v1beta/openai",
            api_key,
            model,
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f32,
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let mut payload = json!({
            "model": self.model,
            "messages": translate_messages(messages),
            "temperature": temperature,
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools
                .iter()
                .map(ToolDefinition::to_function_schema)
                .collect::<Vec<_>>());
            payload["tool_choice"] = tool_choice_value(&tool_choice);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
        if self.api_key.is_empty() {
            return false;
        }
        let result = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> Backend {
        self.backend
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
                                // Arguments are a JSON string on this wire format
                                "arguments": Value::Object(tc.arguments.clone()).to_string(),
                            },
                        })
                    })
                    .collect::<Vec<_>>());
            }

            if msg.role == Role::Tool {
                if let Some(id) = &msg.tool_call_id {
                    m["tool_call_id"] = json!(id);
                }
                if let Some(name) = &msg.name {
                    m["name"] = json!(name);
                }
            }

            m
        })
        .collect()
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Function(name) => json!({
            "type": "function",
            "function": {"name": name},
        }),
    }
}

fn parse_response(data: &Value) -> Result<ChatResponse, LlmError> {
    let choice = data["choices"]
        .get(0)
        .ok_or_else(|| LlmError::unknown("Response contained no choices"))?;
    let message = &choice["message"];

    let tool_calls = message["tool_calls"].as_array().map(|calls| {
        calls
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                let func = &tc["function"];
                ToolCall {
                    id: tc["id"]
                        .as_str()
                        .map_or_else(|| format!("call_{i}"), str::to_string),
                    name: func["name"].as_str().unwrap_or("").to_string(),
                    arguments: decode_arguments(&func["arguments"]),
                }
            })
            .collect::<Vec<_>>()
    });

    let usage = data.get("usage").map(|u| TokenUsage {
        prompt_tokens: u["prompt_tokens"].as_i64().unwrap_or(0),
        completion_tokens: u["completion_tokens"].as_i64().unwrap_or(0),
    });

    Ok(ChatResponse {
        message: ChatMessage {
            role: Role::Assistant,
            content: message["content"].as_str().map(str::to_string),
            tool_calls,
            tool_call_id: None,
            name: None,
        },
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
        usage,
    })
}

/// Arguments arrive as a JSON-encoded string; tolerate an object as well.
fn decode_arguments(value: &Value) -> Map<String, Value> {
    match value {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_tool_message() {
        let messages = vec![ChatMessage::tool("pong", "call_1", "ping_gateway")];
        let translated = translate_messages(&messages);
        assert_eq!(translated[0]["role"], "tool");
        assert_eq!(translated[0]["tool_call_id"], "call_1");
        assert_eq!(translated[0]["name"], "ping_gateway");
    }

    #[test]
    fn test_assistant_arguments_encoded_as_string() {
        let mut args = Map::new();
        args.insert("count".to_string(), json!(4));
        let messages = vec![ChatMessage::assistant(
            None,
            Some(vec![ToolCall {
                id: "call_1".to_string(),
                name: "ping_gateway".to_string(),
                arguments: args,
            }]),
        )];
        let translated = translate_messages(&messages);
        let arguments = &translated[0]["tool_calls"][0]["function"]["arguments"];
        assert!(arguments.is_string());
        assert_eq!(arguments.as_str().unwrap(), r#"{"count":4}"#);
    }

    #[test]
    fn test_tool_choice_values() {
        assert_eq!(tool_choice_value(&ToolChoice::Auto), json!("auto"));
        assert_eq!(tool_choice_value(&ToolChoice::Required), json!("required"));
        assert_eq!(tool_choice_value(&ToolChoice::None), json!("none"));
        assert_eq!(
            tool_choice_value(&ToolChoice::Function("ping_dns".to_string())),
            json!({"type": "function", "function": {"name": "ping_dns"}})
        );
    }

    #[test]
    fn test_parse_tool_call_response() {
        let data = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "ping_gateway",
                            "arguments": "{\"count\": 4}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 15}
        });

        let response = parse_response(&data).unwrap();
        assert!(response.has_tool_calls());
        let calls = response.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].arguments["count"], json!(4));
        assert_eq!(response.usage.unwrap().prompt_tokens, 120);
        assert_eq!(response.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_parse_text_response() {
        let data = json!({
            "choices": [{
                "message": {"content": "Your gateway is responsive."},
                "finish_reason": "stop"
            }]
        });
        let response = parse_response(&data).unwrap();
        assert!(!response.has_tool_calls());
        assert_eq!(response.content(), "Your gateway is responsive.");
    }

    #[test]
    fn test_parse_empty_choices_is_error() {
        assert!(parse_response(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_decode_arguments_tolerates_objects() {
        assert_eq!(decode_arguments(&json!({"a": 1}))["a"], json!(1));
        assert_eq!(decode_arguments(&json!("{\"a\": 1}"))["a"], json!(1));
        assert!(decode_arguments(&json!(42)).is_empty());
        assert!(decode_arguments(&json!("not json")).is_empty());
    }
}
