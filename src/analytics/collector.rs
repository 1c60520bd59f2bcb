//! Analytics collector
//!
//! Tracks live sessions and turns agent activity into persisted events and
//! session aggregates. Each session carries its own running state (tool
//! sequence, consecutive-call counter) so concurrent sessions never
//! interleave their loop detection.
//!
//! Persistence failures are logged and the in-memory session keeps going so
//! the user is never blocked on the database.

use super::cost::CostCalculator;
use super::models::{
    Event, EventType, Feedback, IssueCategory, ResolutionPath, Session, SessionOutcome, ToolEvent,
};
use super::patterns::{categorize_by_tools, category_for_tool, lowest_osi_layer};
use super::storage::AnalyticsStorage;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Preview length taken from the first user message
const PREVIEW_MAX: usize = 80;

struct SessionTrack {
    session: Session,
    tool_sequence: Vec<String>,
    last_tool_name: Option<String>,
    consecutive_count: i64,
}

/// Collector for tracking analytics across concurrent diagnostic sessions
pub struct AnalyticsCollector {
    storage: AnalyticsStorage,
    cost: CostCalculator,
    active: Mutex<HashMap<String, SessionTrack>>,
}

impl AnalyticsCollector {
    pub fn new(storage: AnalyticsStorage) -> Self {
        Self {
            storage,
            cost: CostCalculator::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &AnalyticsStorage {
        &self.storage
    }

    // Session lifecycle

    /// Start tracking a new session
    pub fn start_session(&self, session_id: Option<String>) -> Session {
        let session = Session::new(session_id);
        self.persist_session(&session);

        let mut active = self.active.lock().unwrap();
        active.insert(
            session.session_id.clone(),
            SessionTrack {
                session: session.clone(),
                tool_sequence: Vec::new(),
                last_tool_name: None,
                consecutive_count: 0,
            },
        );
        session
    }

    /// Snapshot of a session, preferring live state over storage
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        {
            let active = self.active.lock().unwrap();
            if let Some(track) = active.get(session_id) {
                return Some(track.session.clone());
            }
        }
        self.storage.get_session(session_id).ok().flatten()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.lock().unwrap().contains_key(session_id)
    }

    /// End a session. Idempotent: ending an already-ended session changes
    /// nothing. The resolution path is written only when any tool ran.
    pub fn end_session(&self, session_id: &str, outcome: SessionOutcome) -> Option<Session> {
        let track = {
            let mut active = self.active.lock().unwrap();
            active.remove(session_id)
        };

        let Some(mut track) = track else {
            return self.storage.get_session(session_id).ok().flatten();
        };

        track.session.ended_at = Some(Utc::now());
        track.session.outcome = outcome;

        if track.session.issue_category == IssueCategory::Unknown && !track.tool_sequence.is_empty()
        {
            track.session.issue_category = categorize_by_tools(&track.tool_sequence);
        }
        if track.session.osi_layer_resolved.is_none() {
            track.session.osi_layer_resolved = lowest_osi_layer(&track.tool_sequence);
        }

        if !track.tool_sequence.is_empty() {
            let path = ResolutionPath {
                path_id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                tool_sequence: track.tool_sequence.clone(),
                was_successful: outcome == SessionOutcome::Resolved,
                created_at: Utc::now(),
            };
            if let Err(e) = self.storage.save_resolution_path(&path) {
                tracing::warn!(error = %e, "Failed to persist resolution path");
            }
        }

        self.persist_session(&track.session);
        Some(track.session)
    }

    /// Record the backend selected for the session's first LLM call
    pub fn set_session_backend(
        &self,
        session_id: &str,
        backend: &str,
        model_name: &str,
        had_fallback: bool,
    ) {
        let mut active = self.active.lock().unwrap();
        if let Some(track) = active.get_mut(session_id) {
            track.session.llm_backend = Some(backend.to_string());
            track.session.model_name = Some(model_name.to_string());
            track.session.had_fallback = track.session.had_fallback || had_fallback;
            let snapshot = track.session.clone();
            drop(active);
            self.persist_session(&snapshot);
        }
    }

    // Event recording

    pub fn record_llm_call(
        &self,
        session_id: &str,
        duration_ms: i64,
        prompt_tokens: i64,
        completion_tokens: i64,
        model_name: &str,
    ) {
        let mut event = Event::new(session_id, EventType::LlmCall);
        event.duration_ms = Some(duration_ms);
        event.prompt_tokens = prompt_tokens;
        event.completion_tokens = completion_tokens;
        event.metadata.insert("model".to_string(), json!(model_name));
        self.persist_event(&event);

        let mut active = self.active.lock().unwrap();
        if let Some(track) = active.get_mut(session_id) {
            track.session.total_prompt_tokens += prompt_tokens;
            track.session.total_completion_tokens += completion_tokens;
            track.session.total_llm_time_ms += duration_ms;
            track.session.message_count += 1;

            // Local sidecar calls are free
            if track
                .session
                .llm_backend
                .as_deref()
                .is_some_and(|b| b != "ollama")
            {
                track.session.estimated_cost_usd +=
                    self.cost
                        .calculate_cost(model_name, prompt_tokens, completion_tokens);
            }

            let snapshot = track.session.clone();
            drop(active);
            self.persist_session(&snapshot);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_tool_call(
        &self,
        session_id: &str,
        tool_name: &str,
        duration_ms: i64,
        success: bool,
        error_message: Option<String>,
        arguments: Map<String, Value>,
        result_summary: Option<String>,
    ) {
        let mut active = self.active.lock().unwrap();
        let Some(track) = active.get_mut(session_id) else {
            return;
        };

        let is_repeated = track.last_tool_name.as_deref() == Some(tool_name);
        if is_repeated {
            track.consecutive_count += 1;
        } else {
            track.consecutive_count = 1;
        }
        track.last_tool_name = Some(tool_name.to_string());
        track.tool_sequence.push(tool_name.to_string());

        let tool_event = ToolEvent {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            tool_name: tool_name.to_string(),
            execution_time_ms: duration_ms,
            success,
            error_message,
            is_repeated: is_repeated && track.consecutive_count >= 2,
            consecutive_count: track.consecutive_count,
            arguments,
            result_summary,
        };

        track.session.tool_call_count += 1;
        track.session.total_tool_time_ms += duration_ms;

        // A categorizing tool updates the session's category live
        if category_for_tool(tool_name).is_some() {
            track.session.issue_category = categorize_by_tools(&track.tool_sequence);
        }

        let snapshot = track.session.clone();
        drop(active);

        if let Err(e) = self.storage.save_tool_event(&tool_event) {
            tracing::warn!(error = %e, "Failed to persist tool event");
        }
        self.persist_session(&snapshot);
    }

    pub fn record_user_message(&self, session_id: &str, message: &str) {
        let mut event = Event::new(session_id, EventType::UserMessage);
        event
            .metadata
            .insert("message_length".to_string(), json!(message.len()));
        self.persist_event(&event);

        let mut active = self.active.lock().unwrap();
        if let Some(track) = active.get_mut(session_id) {
            track.session.user_message_count += 1;
            if track.session.preview.is_none() {
                track.session.preview = Some(truncate_chars(message, PREVIEW_MAX));
            }
            let snapshot = track.session.clone();
            drop(active);
            self.persist_session(&snapshot);
        }
    }

    pub fn record_assistant_message(&self, session_id: &str, content_length: usize) {
        let mut event = Event::new(session_id, EventType::AssistantMessage);
        event
            .metadata
            .insert("message_length".to_string(), json!(content_length));
        self.persist_event(&event);
    }

    pub fn record_fallback(&self, session_id: &str, from: &str, to: &str, reason: &str) {
        let mut event = Event::new(session_id, EventType::Fallback);
        event.metadata.insert("from_backend".to_string(), json!(from));
        event.metadata.insert("to_backend".to_string(), json!(to));
        event.metadata.insert("reason".to_string(), json!(reason));
        self.persist_event(&event);

        let mut active = self.active.lock().unwrap();
        if let Some(track) = active.get_mut(session_id) {
            track.session.had_fallback = true;
            let snapshot = track.session.clone();
            drop(active);
            self.persist_session(&snapshot);
        }
    }

    pub fn record_error(&self, session_id: &str, message: &str) {
        let mut event = Event::new(session_id, EventType::Error);
        event.metadata.insert("message".to_string(), json!(message));
        self.persist_event(&event);
    }

    /// Record user feedback, replacing any prior feedback for the session
    pub fn record_feedback(
        &self,
        session_id: &str,
        score: i64,
        comment: Option<String>,
        source: &str,
    ) -> Feedback {
        let feedback = Feedback {
            feedback_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            score,
            comment: comment.clone(),
            timestamp: Utc::now(),
            source: source.to_string(),
        };
        if let Err(e) = self.storage.save_feedback(&feedback) {
            tracing::warn!(error = %e, "Failed to persist feedback");
        }

        let updated = {
            let mut active = self.active.lock().unwrap();
            if let Some(track) = active.get_mut(session_id) {
                track.session.feedback_score = Some(score);
                track.session.feedback_comment = comment.clone();
                Some(track.session.clone())
            } else {
                None
            }
        };
        match updated {
            Some(session) => self.persist_session(&session),
            None => {
                if let Ok(Some(mut session)) = self.storage.get_session(session_id) {
                    session.feedback_score = Some(score);
                    session.feedback_comment = comment;
                    self.persist_session(&session);
                }
            }
        }

        feedback
    }

    fn persist_session(&self, session: &Session) {
        if let Err(e) = self.storage.save_session(session) {
            tracing::warn!(session_id = %session.session_id, error = %e, "Failed to persist session");
        }
    }

    fn persist_event(&self, event: &Event) {
        if let Err(e) = self.storage.save_event(event) {
            tracing::warn!(session_id = %event.session_id, error = %e, "Failed to persist event");
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> AnalyticsCollector {
        AnalyticsCollector::new(AnalyticsStorage::open_in_memory().unwrap())
    }

    #[test]
    fn test_loop_detection() {
        let c = collector();
        let session = c.start_session(Some("s1".to_string()));

        for _ in 0..3 {
            c.record_tool_call(
                &session.session_id,
                "ping_gateway",
                5,
                true,
                None,
                Map::new(),
                None,
            );
        }
        c.record_tool_call(&session.session_id, "ping_dns", 5, true, None, Map::new(), None);

        let events = c.storage.get_tool_events("s1").unwrap();
        assert_eq!(events.len(), 4);
        assert!(!events[0].is_repeated);
        assert_eq!(events[0].consecutive_count, 1);
        assert!(events[1].is_repeated);
        assert_eq!(events[1].consecutive_count, 2);
        assert!(events[2].is_repeated);
        assert_eq!(events[2].consecutive_count, 3);
        // Different tool resets the streak
        assert!(!events[3].is_repeated);
        assert_eq!(events[3].consecutive_count, 1);
    }

    #[test]
    fn test_aggregates_match_events() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        c.set_session_backend("s1", "openai", "gpt-4o-mini", false);

        c.record_llm_call("s1", 100, 50, 10, "gpt-4o-mini");
        c.record_llm_call("s1", 200, 70, 20, "gpt-4o-mini");
        c.record_tool_call("s1", "ping_gateway", 30, true, None, Map::new(), None);

        let session = c.get_session("s1").unwrap();
        assert_eq!(session.total_prompt_tokens, 120);
        assert_eq!(session.total_completion_tokens, 30);
        assert_eq!(session.total_llm_time_ms, 300);
        assert_eq!(session.total_tool_time_ms, 30);
        assert_eq!(session.message_count, 2);
        assert_eq!(session.tool_call_count, 1);
        assert!(session.estimated_cost_usd > 0.0);

        // Aggregates equal the sum over the originating events
        let events = c.storage.get_events("s1").unwrap();
        let llm_events: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::LlmCall)
            .collect();
        let prompt_sum: i64 = llm_events.iter().map(|e| e.prompt_tokens).sum();
        assert_eq!(prompt_sum, session.total_prompt_tokens);

        let tool_events = c.storage.get_tool_events("s1").unwrap();
        assert_eq!(tool_events.len() as i64, session.tool_call_count);
    }

    #[test]
    fn test_sidecar_calls_cost_nothing() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        c.set_session_backend("s1", "ollama", "ministral:latest", false);
        c.record_llm_call("s1", 100, 1_000_000, 1_000_000, "ministral:latest");

        let session = c.get_session("s1").unwrap();
        assert!(session.estimated_cost_usd.abs() < f64::EPSILON);
    }

    #[test]
    fn test_fallback_flag() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        assert!(!c.get_session("s1").unwrap().had_fallback);

        c.record_fallback("s1", "openai", "ollama", "OpenAI not available");

        let session = c.get_session("s1").unwrap();
        assert!(session.had_fallback);

        let events = c.storage.get_events("s1").unwrap();
        let fallback = events
            .iter()
            .find(|e| e.event_type == EventType::Fallback)
            .unwrap();
        assert_eq!(fallback.metadata["from_backend"], json!("openai"));
        assert_eq!(fallback.metadata["to_backend"], json!("ollama"));
    }

    #[test]
    fn test_end_session_idempotent() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        c.record_tool_call("s1", "ping_gateway", 10, true, None, Map::new(), None);

        let first = c.end_session("s1", SessionOutcome::Resolved).unwrap();
        assert!(first.ended_at.is_some());
        assert_eq!(first.outcome, SessionOutcome::Resolved);
        assert_eq!(first.issue_category, IssueCategory::Gateway);
        assert_eq!(first.osi_layer_resolved, Some(3));

        // Second end is a no-op returning the stored state
        let second = c.end_session("s1", SessionOutcome::Abandoned).unwrap();
        assert_eq!(second.outcome, SessionOutcome::Resolved);
        assert_eq!(second.ended_at.map(|t| t.timestamp()), first.ended_at.map(|t| t.timestamp()));
    }

    #[test]
    fn test_resolution_path_only_when_tools_ran() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        c.end_session("s1", SessionOutcome::Resolved);
        assert!(c.storage.get_common_resolution_paths(10).unwrap().is_empty());

        c.start_session(Some("s2".to_string()));
        c.record_tool_call("s2", "ping_gateway", 10, true, None, Map::new(), None);
        c.end_session("s2", SessionOutcome::Resolved);
        let paths = c.storage.get_common_resolution_paths(10).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].0, vec!["ping_gateway".to_string()]);
    }

    #[test]
    fn test_preview_from_first_user_message() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        c.record_user_message("s1", "My WiFi isn't working");
        c.record_user_message("s1", "It's still broken");

        let session = c.get_session("s1").unwrap();
        assert_eq!(session.preview.as_deref(), Some("My WiFi isn't working"));
        assert_eq!(session.user_message_count, 2);
    }

    #[test]
    fn test_live_category_update() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        assert_eq!(c.get_session("s1").unwrap().issue_category, IssueCategory::Unknown);

        c.record_tool_call("s1", "enable_wifi", 10, true, None, Map::new(), None);
        assert_eq!(c.get_session("s1").unwrap().issue_category, IssueCategory::Wifi);
    }

    #[test]
    fn test_feedback_on_inactive_session() {
        let c = collector();
        c.start_session(Some("s1".to_string()));
        c.end_session("s1", SessionOutcome::Resolved);

        c.record_feedback("s1", 4, Some("helpful".to_string()), "api");
        let session = c.get_session("s1").unwrap();
        assert_eq!(session.feedback_score, Some(4));
        assert_eq!(session.feedback_comment.as_deref(), Some("helpful"));
    }
}
