//! Tool registry: validated dispatch of LLM tool calls into diagnostics

use super::{ToolCall, ToolDefinition, ToolResult};
use crate::analytics::AnalyticsCollector;
use crate::diagnostics::Diagnostic;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Maximum length of the result summary stored with a tool event
const RESULT_SUMMARY_MAX: usize = 200;

/// Registry of diagnostic tools available to the agent.
///
/// Registration happens once at startup; after that the registry is
/// read-only and shared behind an `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Diagnostic>>,
    definitions: Vec<ToolDefinition>,
    analytics: Option<Arc<AnalyticsCollector>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            definitions: Vec::new(),
            analytics: None,
        }
    }

    pub fn set_analytics(&mut self, collector: Arc<AnalyticsCollector>) {
        self.analytics = Some(collector);
    }

    /// Install a tool. A duplicate name replaces the earlier registration.
    pub fn register(&mut self, tool: impl Diagnostic + 'static) {
        let definition = tool.definition();
        tracing::debug!(tool = %definition.name, "Registered tool");
        self.definitions.retain(|d| d.name != definition.name);
        self.tools.insert(definition.name.clone(), Arc::new(tool));
        self.definitions.push(definition);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[allow(dead_code)] // Pairs with len()
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All tool definitions in registration order
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Execute a tool call, recording a tool-call analytics event.
    ///
    /// Never returns an error: unknown tools and panicking handlers are
    /// converted into failed results so the agent loop can keep going and
    /// the model gets a chance to react.
    pub async fn execute(
        &self,
        call: &ToolCall,
        session_id: Option<&str>,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::error!(tool = %call.name, "Unknown tool requested");
            self.record(
                session_id,
                &call.name,
                0,
                false,
                Some(format!("Unknown tool '{}'", call.name)),
                call,
                None,
            );
            return ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content: format!("Error: Unknown tool '{}'", call.name),
                success: false,
            };
        };

        tracing::info!(tool = %call.name, args = %serde_json::Value::Object(call.arguments.clone()), "Executing tool");
        let start = Instant::now();

        let run = tool.run(Value::Object(call.arguments.clone()), cancel);
        let (success, content, error) = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => {
                let content = result.to_llm_response();
                (result.success, content, result.error)
            }
            Err(panic) => {
                let msg = panic_message(&panic);
                tracing::error!(tool = %call.name, error = %msg, "Tool panicked");
                (
                    false,
                    format!("Error executing tool: {msg}"),
                    Some(msg),
                )
            }
        };

        let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);
        tracing::info!(
            tool = %call.name,
            duration_ms,
            success,
            "Tool completed"
        );

        self.record(
            session_id,
            &call.name,
            duration_ms,
            success,
            error,
            call,
            Some(truncate_summary(&content)),
        );

        ToolResult {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            success,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        duration_ms: i64,
        success: bool,
        error: Option<String>,
        call: &ToolCall,
        result_summary: Option<String>,
    ) {
        let (Some(analytics), Some(session_id)) = (&self.analytics, session_id) else {
            return;
        };
        analytics.record_tool_call(
            session_id,
            tool_name,
            duration_ms,
            success,
            error,
            call.arguments.clone(),
            result_summary,
        );
    }
}

fn truncate_summary(content: &str) -> String {
    if content.chars().count() <= RESULT_SUMMARY_MAX {
        content.to_string()
    } else {
        content.chars().take(RESULT_SUMMARY_MAX).collect()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{DiagnosticResult, Platform};
    use crate::tools::{ParamType, ToolCategory, ToolParameter};
    use async_trait::async_trait;
    use serde_json::Map;

    struct EchoTool;

    #[async_trait]
    impl Diagnostic for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                display_name: "Echo".to_string(),
                description: "Echoes its input".to_string(),
                category: ToolCategory::System,
                osi_layer: 7,
                parameters: vec![ToolParameter::required(
                    "text",
                    ParamType::String,
                    "Text to echo",
                )],
            }
        }

        async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
            let mut data = Map::new();
            data.insert("echoed".to_string(), args["text"].clone());
            DiagnosticResult::success("echo", Platform::Linux, data)
        }
    }

    struct PanicTool;

    #[async_trait]
    impl Diagnostic for PanicTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "panics".to_string(),
                display_name: "Panics".to_string(),
                description: "Always panics".to_string(),
                category: ToolCategory::System,
                osi_layer: 7,
                parameters: vec![],
            }
        }

        async fn run(&self, _args: Value, _cancel: CancellationToken) -> DiagnosticResult {
            panic!("boom");
        }
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_execute_known_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .execute(
                &call("echo", serde_json::json!({"text": "hi"})),
                None,
                CancellationToken::new(),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.tool_call_id, "call_1");
        assert_eq!(result.name, "echo");
        assert!(result.content.contains("\"hi\""));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute(
                &call("foo_bar", serde_json::json!({})),
                None,
                CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.content, "Error: Unknown tool 'foo_bar'");
        assert_eq!(result.tool_call_id, "call_1");
    }

    #[tokio::test]
    async fn test_panic_converted_to_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(PanicTool);

        let result = registry
            .execute(
                &call("panics", serde_json::json!({})),
                None,
                CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert!(result.content.contains("Error executing tool: boom"));
    }

    #[test]
    fn test_duplicate_registration_overwrites() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(EchoTool);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.definitions().len(), 1);
    }

    #[test]
    fn test_truncate_summary() {
        let long = "x".repeat(500);
        assert_eq!(truncate_summary(&long).len(), RESULT_SUMMARY_MAX);
        assert_eq!(truncate_summary("short"), "short");
    }
}
