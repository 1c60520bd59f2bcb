//! Data model for sessions, events, and derived aggregates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Possible outcomes for a diagnostic session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Resolved,
    Unresolved,
    Abandoned,
    InProgress,
}

impl SessionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOutcome::Resolved => "resolved",
            SessionOutcome::Unresolved => "unresolved",
            SessionOutcome::Abandoned => "abandoned",
            SessionOutcome::InProgress => "in_progress",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "resolved" => Some(SessionOutcome::Resolved),
            "unresolved" => Some(SessionOutcome::Unresolved),
            "abandoned" => Some(SessionOutcome::Abandoned),
            "in_progress" => Some(SessionOutcome::InProgress),
            _ => None,
        }
    }

    /// Terminal outcomes require an end time on the session.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionOutcome::InProgress)
    }
}

/// Categories of network issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Wifi,
    Dns,
    Gateway,
    Connectivity,
    IpConfig,
    Adapter,
    Other,
    Unknown,
}

impl IssueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Wifi => "wifi",
            IssueCategory::Dns => "dns",
            IssueCategory::Gateway => "gateway",
            IssueCategory::Connectivity => "connectivity",
            IssueCategory::IpConfig => "ip_config",
            IssueCategory::Adapter => "adapter",
            IssueCategory::Other => "other",
            IssueCategory::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "wifi" => IssueCategory::Wifi,
            "dns" => IssueCategory::Dns,
            "gateway" => IssueCategory::Gateway,
            "connectivity" => IssueCategory::Connectivity,
            "ip_config" => IssueCategory::IpConfig,
            "adapter" => IssueCategory::Adapter,
            "other" => IssueCategory::Other,
            _ => IssueCategory::Unknown,
        }
    }
}

/// Types of trackable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    LlmCall,
    ToolCall,
    UserMessage,
    AssistantMessage,
    Fallback,
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::LlmCall => "llm_call",
            EventType::ToolCall => "tool_call",
            EventType::UserMessage => "user_message",
            EventType::AssistantMessage => "assistant_message",
            EventType::Fallback => "fallback",
            EventType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "llm_call" => Some(EventType::LlmCall),
            "tool_call" => Some(EventType::ToolCall),
            "user_message" => Some(EventType::UserMessage),
            "assistant_message" => Some(EventType::AssistantMessage),
            "fallback" => Some(EventType::Fallback),
            "error" => Some(EventType::Error),
            _ => None,
        }
    }
}

/// A complete diagnostic conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,

    pub outcome: SessionOutcome,
    pub feedback_score: Option<i64>,
    pub feedback_comment: Option<String>,

    pub issue_category: IssueCategory,
    pub osi_layer_resolved: Option<i64>,

    pub message_count: i64,
    pub user_message_count: i64,
    pub tool_call_count: i64,

    pub llm_backend: Option<String>,
    pub model_name: Option<String>,
    pub had_fallback: bool,

    pub estimated_cost_usd: f64,
    pub total_llm_time_ms: i64,
    pub total_tool_time_ms: i64,

    pub preview: Option<String>,
}

impl Session {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id: session_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            started_at: Utc::now(),
            ended_at: None,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            outcome: SessionOutcome::InProgress,
            feedback_score: None,
            feedback_comment: None,
            issue_category: IssueCategory::Unknown,
            osi_layer_resolved: None,
            message_count: 0,
            user_message_count: 0,
            tool_call_count: 0,
            llm_backend: None,
            model_name: None,
            had_fallback: false,
            estimated_cost_usd: 0.0,
            total_llm_time_ms: 0,
            total_tool_time_ms: 0,
            preview: None,
        }
    }

    #[allow(dead_code)] // Reporting convenience
    pub fn total_tokens(&self) -> i64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    #[allow(dead_code)] // Reporting convenience
    pub fn time_to_resolution_seconds(&self) -> Option<f64> {
        self.ended_at.map(|ended| {
            #[allow(clippy::cast_precision_loss)]
            let ms = (ended - self.started_at).num_milliseconds() as f64;
            ms / 1000.0
        })
    }
}

/// Individual trackable moment in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub session_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub metadata: Map<String, Value>,
}

impl Event {
    pub fn new(session_id: &str, event_type: EventType) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            duration_ms: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            metadata: Map::new(),
        }
    }
}

/// Tool-specific tracking record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub event_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub execution_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    /// Same tool called consecutively
    pub is_repeated: bool,
    /// Run length of the current consecutive streak
    pub consecutive_count: i64,
    pub arguments: Map<String, Value>,
    pub result_summary: Option<String>,
}

/// Explicit user feedback for a session (at most one, replace semantics)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub feedback_id: String,
    pub session_id: String,
    pub score: i64,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

/// Ordered sequence of tools leading to (or failing) resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionPath {
    pub path_id: String,
    pub session_id: String,
    pub tool_sequence: Vec<String>,
    pub was_successful: bool,
    pub created_at: DateTime<Utc>,
}

/// A chat message persisted with its session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub session_id: String,
    pub sequence_id: i64,
    pub role: String,
    pub content: String,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    /// Assistant tool calls, serialized
    pub tool_calls: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

// Aggregates

/// Per-tool statistics
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub total_calls: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_execution_time_ms: f64,
    pub total_execution_time_ms: i64,
    pub loop_occurrences: i64,
}

impl ToolStats {
    #[allow(dead_code)] // Consumed by dashboards
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.success_count as f64 / self.total_calls as f64 * 100.0
        }
    }
}

/// Summary statistics across sessions
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub total_sessions: i64,
    pub resolved_count: i64,
    pub unresolved_count: i64,
    pub abandoned_count: i64,
    pub in_progress_count: i64,
    pub avg_tokens_per_session: f64,
    pub avg_time_to_resolution_seconds: f64,
    pub avg_messages_per_session: f64,
    pub total_cost_usd: f64,
    pub backend_counts: Map<String, Value>,
    pub fallback_count: i64,
}

/// Conversation quality metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct QualityMetrics {
    pub avg_messages_to_resolution: f64,
    pub sessions_with_loops: i64,
    pub total_loop_occurrences: i64,
    pub abandoned_sessions: i64,
    pub drop_off_rate: f64,
}

/// One time bucket of `get_cost_by_period`
#[derive(Debug, Clone, Serialize)]
pub struct CostPeriod {
    pub period: String,
    pub total_cost: f64,
    pub total_tokens: i64,
    pub session_count: i64,
}

/// Granularity for `get_cost_by_period`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostGranularity {
    Day,
    Week,
    Month,
}

impl CostGranularity {
    pub fn strftime_format(self) -> &'static str {
        match self {
            CostGranularity::Day => "%Y-%m-%d",
            CostGranularity::Week => "%Y-%W",
            CostGranularity::Month => "%Y-%m",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_roundtrip() {
        for outcome in [
            SessionOutcome::Resolved,
            SessionOutcome::Unresolved,
            SessionOutcome::Abandoned,
            SessionOutcome::InProgress,
        ] {
            assert_eq!(SessionOutcome::parse(outcome.as_str()), Some(outcome));
        }
        assert!(!SessionOutcome::InProgress.is_terminal());
        assert!(SessionOutcome::Resolved.is_terminal());
    }

    #[test]
    fn test_category_parse_unknown_fallback() {
        assert_eq!(IssueCategory::parse("dns"), IssueCategory::Dns);
        assert_eq!(IssueCategory::parse("garbage"), IssueCategory::Unknown);
    }

    #[test]
    fn test_time_to_resolution() {
        let mut session = Session::new(None);
        assert!(session.time_to_resolution_seconds().is_none());

        session.ended_at = Some(session.started_at + chrono::Duration::seconds(90));
        let ttr = session.time_to_resolution_seconds().unwrap();
        assert!((ttr - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tool_stats_success_rate() {
        let stats = ToolStats {
            tool_name: "ping_gateway".to_string(),
            total_calls: 4,
            success_count: 3,
            failure_count: 1,
            avg_execution_time_ms: 10.0,
            total_execution_time_ms: 40,
            loop_occurrences: 0,
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
    }
}
