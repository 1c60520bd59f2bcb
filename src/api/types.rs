//! Request/response types for the HTTP API

use crate::analytics::{Event, Feedback, Session, ToolEvent};
use crate::runtime::{ResponseDiagnostics, ToolCallRecord};
use crate::tools::ToolParameter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the chat endpoint
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Response from the chat endpoint
#[derive(Debug, Serialize)]
pub struct ChatResponseBody {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    pub conversation_id: String,
    pub session_id: String,
    pub diagnostics: ResponseDiagnostics,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub llm_backends: std::collections::HashMap<String, bool>,
    pub tools_available: usize,
}

#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// Session list item for the sidebar
#[derive(Debug, Serialize)]
pub struct SessionListItem {
    pub id: String,
    pub started_at: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_category: Option<String>,
    pub preview: String,
    pub message_count: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub items: Vec<SessionListItem>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

/// Full session with its ordered events and feedback
#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: Session,
    pub events: Vec<Event>,
    pub tool_events: Vec<ToolEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Serialize)]
pub struct MessageItem {
    pub id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateSessionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_updated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_updated: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub session_id: String,
    pub score: i64,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_feedback_source")]
    pub source: String,
}

fn default_feedback_source() -> String {
    "api".to_string()
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    pub feedback_id: String,
    pub session_id: String,
    pub score: i64,
}

/// Tool definition in the external (UI) schema
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub description: String,
    pub category: String,
    #[serde(rename = "osiLayer")]
    pub osi_layer: u8,
    pub parameters: Vec<ToolParameter>,
}

/// Result of an external tool execution
#[derive(Debug, Serialize)]
pub struct ToolExecuteResponse {
    #[serde(rename = "toolCallId")]
    pub tool_call_id: String,
    pub name: String,
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: i64,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsRangeQuery {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CostQuery {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default = "default_granularity")]
    pub granularity: String,
}

fn default_granularity() -> String {
    "day".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PathsQuery {
    #[serde(default = "default_paths_limit")]
    pub limit: i64,
}

fn default_paths_limit() -> i64 {
    10
}

#[derive(Debug, Serialize)]
pub struct ResolutionPathItem {
    pub tool_sequence: Vec<String>,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
