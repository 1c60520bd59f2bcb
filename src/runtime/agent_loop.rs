//! The multi-turn tool loop
//!
//! Alternates LLM calls with tool executions until the model produces a
//! plain reply or the iteration bound is hit. The first turn forces a tool
//! call; the fall-through turn forbids them, guaranteeing a textual reply.

use super::session::{SessionHandle, SessionManager};
use crate::analytics::{AnalyticsCollector, SessionOutcome};
use crate::llm::{ChatMessage, ChatResponse, LlmError, LlmRouter, Role, ToolChoice};
use crate::tools::ToolRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Upper bound on tool-loop iterations per user message
pub const MAX_TOOL_ITERATIONS: usize = 7;

const TEMPERATURE: f32 = 0.3;
const CONFIDENCE_BASE: f64 = 0.5;
const CONFIDENCE_TOOL_WEIGHT: f64 = 0.4;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Turn cancelled")]
    Cancelled,
}

/// One executed tool call, for the response envelope
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: Value,
    pub result: String,
    pub success: bool,
    pub duration_ms: i64,
}

/// Per-response diagnostics envelope
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResponseDiagnostics {
    pub confidence_score: f64,
    pub thoughts: Vec<String>,
    pub tools_used: Vec<ToolUsedInfo>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolUsedInfo {
    pub name: String,
    pub success: bool,
    pub duration_ms: i64,
}

/// Outcome of one user turn
#[derive(Debug)]
pub struct ChatOutcome {
    pub response: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub session_id: String,
    pub diagnostics: ResponseDiagnostics,
}

/// Drives chat turns: session lookup, the tool loop, and persistence.
pub struct AgentRuntime {
    router: Arc<LlmRouter>,
    registry: Arc<ToolRegistry>,
    collector: Arc<AnalyticsCollector>,
    sessions: Arc<SessionManager>,
}

impl AgentRuntime {
    pub fn new(
        router: Arc<LlmRouter>,
        registry: Arc<ToolRegistry>,
        collector: Arc<AnalyticsCollector>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            router,
            registry,
            collector,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Handle one user message: run the tool loop to completion and return
    /// the assistant's reply with its diagnostics envelope.
    #[allow(clippy::too_many_lines)] // One turn is inherently sequential
    pub async fn handle_chat(
        &self,
        message: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatOutcome, AgentError> {
        let (handle, is_new) = self.sessions.get_or_create(conversation_id);
        let cancel = handle.cancel_token();

        // Per-session critical section: turns within a session serialize here
        let mut state = handle.state.lock().await;
        let session_id = state.session_id.clone();

        if is_new {
            self.collector.start_session(Some(session_id.clone()));
            // Persist the system prompt so the log can be restored later
            if let Some(system) = state.messages.first().cloned() {
                self.persist_message(&session_id, &system);
            }
        } else if !self.collector.is_active(&session_id) {
            // Resumed after restart: re-open tracking for this session
            self.collector.start_session(Some(session_id.clone()));
        }

        let mut diagnostics = ResponseDiagnostics {
            confidence_score: CONFIDENCE_BASE,
            thoughts: vec![format!("Processing user message: {} chars", message.len())],
            tools_used: Vec::new(),
        };
        if is_new {
            diagnostics.thoughts.push("Started new conversation".to_string());
        }

        self.collector.record_user_message(&session_id, message);
        let user_msg = ChatMessage::user(message);
        self.persist_message(&session_id, &user_msg);
        state.messages.push(user_msg);

        let tools = self.registry.definitions().to_vec();
        diagnostics
            .thoughts
            .push(format!("Available tools: {}", tools.len()));

        let mut tool_records: Vec<ToolCallRecord> = Vec::new();
        let mut response: Option<ChatResponse> = None;

        for iteration in 0..MAX_TOOL_ITERATIONS {
            if cancel.is_cancelled() {
                return self.abort_turn(&session_id);
            }

            // The first turn forces a tool call; later turns let the model
            // decide.
            let tool_choice = if iteration == 0 {
                ToolChoice::Required
            } else {
                ToolChoice::Auto
            };
            diagnostics.thoughts.push(format!(
                "Tool loop iteration {}, tool_choice={tool_choice:?}",
                iteration + 1
            ));

            let current = self
                .router
                .chat(&session_id, &state.messages, &tools, TEMPERATURE, tool_choice)
                .await?;

            if iteration == 0 {
                if let (Some(backend), Some(model)) =
                    (self.router.active_backend(), self.router.active_model())
                {
                    self.collector
                        .set_session_backend(&session_id, backend.as_str(), &model, false);
                }
            }

            if !current.has_tool_calls() {
                diagnostics.thoughts.push(format!(
                    "No tool calls in iteration {}, ending loop",
                    iteration + 1
                ));
                response = Some(current);
                break;
            }

            let calls = current.message.tool_calls.clone().unwrap_or_default();
            diagnostics
                .thoughts
                .push(format!("LLM requested {} tool call(s)", calls.len()));

            let assistant_msg = current.message.clone();
            self.persist_message(&session_id, &assistant_msg);
            state.messages.push(assistant_msg);

            // Dispatch in the order the model emitted them; every call gets
            // its tool message before the next LLM turn.
            for call in &calls {
                if cancel.is_cancelled() {
                    return self.abort_turn(&session_id);
                }

                let start = Instant::now();
                let result = self
                    .registry
                    .execute(call, Some(&session_id), cancel.clone())
                    .await;
                let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

                diagnostics.tools_used.push(ToolUsedInfo {
                    name: call.name.clone(),
                    success: result.success,
                    duration_ms,
                });
                diagnostics.thoughts.push(format!(
                    "Tool '{}' returned success={}",
                    call.name, result.success
                ));

                tool_records.push(ToolCallRecord {
                    name: call.name.clone(),
                    arguments: Value::Object(call.arguments.clone()),
                    result: result.content.clone(),
                    success: result.success,
                    duration_ms,
                });

                let tool_msg = ChatMessage::tool(result.content, call.id.clone(), call.name.clone());
                self.persist_message(&session_id, &tool_msg);
                state.messages.push(tool_msg);
            }
        }

        // Loop exhausted: force a textual reply
        let response = match response {
            Some(r) => r,
            None => {
                diagnostics
                    .thoughts
                    .push(format!("Reached max iterations ({MAX_TOOL_ITERATIONS})"));
                self.router
                    .chat(
                        &session_id,
                        &state.messages,
                        &tools,
                        TEMPERATURE,
                        ToolChoice::None,
                    )
                    .await?
            }
        };

        let reply = response.content().to_string();
        diagnostics
            .thoughts
            .push(format!("Response generated: {} chars", reply.len()));

        let assistant_msg = ChatMessage::assistant(Some(reply.clone()), None);
        self.persist_message(&session_id, &assistant_msg);
        state.messages.push(assistant_msg);
        self.collector
            .record_assistant_message(&session_id, reply.len());

        diagnostics.confidence_score = confidence_score(&diagnostics.tools_used);

        Ok(ChatOutcome {
            response: reply,
            tool_calls: tool_records,
            session_id,
            diagnostics,
        })
    }

    /// Cancel a session's in-flight turn and mark it abandoned.
    pub fn cancel_session(&self, session_id: &str) -> bool {
        let cancelled = self.sessions.cancel(session_id);
        if cancelled {
            self.collector
                .end_session(session_id, SessionOutcome::Abandoned);
        }
        cancelled
    }

    fn abort_turn(&self, session_id: &str) -> Result<ChatOutcome, AgentError> {
        // Partial results are already persisted message by message
        self.collector
            .end_session(session_id, SessionOutcome::Abandoned);
        Err(AgentError::Cancelled)
    }

    fn persist_message(&self, session_id: &str, message: &ChatMessage) {
        let tool_calls_json = message
            .tool_calls
            .as_ref()
            .map(|calls| json!(calls));
        let result = self.collector.storage().save_message(
            session_id,
            message.role.as_str(),
            message.content.as_deref().unwrap_or(""),
            message.tool_call_id.as_deref(),
            message.name.as_deref(),
            tool_calls_json.as_ref(),
        );
        if let Err(e) = result {
            // The in-memory session continues so the user is not blocked
            tracing::warn!(session_id, error = %e, "Failed to persist message");
        }
    }
}

/// Base 0.5 plus up to +0.4 for 100% tool success. Advisory only.
fn confidence_score(tools_used: &[ToolUsedInfo]) -> f64 {
    if tools_used.is_empty() {
        return CONFIDENCE_BASE;
    }
    #[allow(clippy::cast_precision_loss)]
    let success_ratio =
        tools_used.iter().filter(|t| t.success).count() as f64 / tools_used.len() as f64;
    CONFIDENCE_BASE + CONFIDENCE_TOOL_WEIGHT * success_ratio
}
