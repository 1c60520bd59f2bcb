//! Per-session conversation state
//!
//! A session's agent loop runs inside that session's async mutex, so turns
//! within one session are serialized while independent sessions proceed in
//! parallel. The cancellation token lives outside that mutex so an in-flight
//! turn can still be aborted. The message log is the source of truth for
//! ordering.

use crate::analytics::AnalyticsStorage;
use crate::llm::{ChatMessage, Role};
use crate::prompts::{AgentType, PromptStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The conversation log of one session
pub struct SessionState {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Shared handle to a session
#[derive(Clone)]
pub struct SessionHandle {
    pub state: Arc<tokio::sync::Mutex<SessionState>>,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl SessionHandle {
    fn new(state: SessionState) -> Self {
        Self {
            state: Arc::new(tokio::sync::Mutex::new(state)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Token observed by the current/next turn
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap().clone()
    }

    /// Abort the in-flight turn. A fresh token is installed so a later turn
    /// on the same session starts unaborted.
    pub fn cancel(&self) {
        let mut guard = self.cancel.lock().unwrap();
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

/// Owns all live sessions and reconstructs finished ones from storage.
pub struct SessionManager {
    storage: AnalyticsStorage,
    prompts: Arc<PromptStore>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new(storage: AnalyticsStorage, prompts: Arc<PromptStore>) -> Self {
        Self {
            storage,
            prompts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Get an existing session or create a new one. Returns the handle and
    /// whether it was newly created in this process.
    ///
    /// A known conversation id that is not in memory is resumed from the
    /// persisted message log.
    pub fn get_or_create(&self, conversation_id: Option<&str>) -> (SessionHandle, bool) {
        let id = conversation_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        {
            let sessions = self.sessions.lock().unwrap();
            if let Some(handle) = sessions.get(&id) {
                return (handle.clone(), false);
            }
        }

        // Not in memory: resume from storage when the log exists there
        let restored = self.restore_messages(&id);
        let is_new = restored.is_none();

        let messages = restored.unwrap_or_else(|| {
            vec![ChatMessage::system(self.prompts.load(AgentType::Diagnostic))]
        });
        let handle = SessionHandle::new(SessionState {
            session_id: id.clone(),
            messages,
        });

        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.entry(id).or_insert_with(|| handle.clone());
        (entry.clone(), is_new)
    }

    fn restore_messages(&self, session_id: &str) -> Option<Vec<ChatMessage>> {
        let stored = self.storage.get_messages(session_id).ok()?;
        if stored.is_empty() {
            return None;
        }

        let messages = stored
            .into_iter()
            .filter_map(|msg| {
                let role = Role::parse(&msg.role)?;
                Some(ChatMessage {
                    role,
                    content: Some(msg.content),
                    tool_calls: msg.tool_calls.and_then(|v| serde_json::from_value(v).ok()),
                    tool_call_id: msg.tool_call_id,
                    name: msg.tool_name,
                })
            })
            .collect();
        Some(messages)
    }

    /// Cancel a session's in-flight turn
    pub fn cancel(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop a session from memory (after delete)
    pub fn remove(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn manager() -> SessionManager {
        SessionManager::new(
            AnalyticsStorage::open_in_memory().unwrap(),
            Arc::new(PromptStore::new(PathBuf::from("/nonexistent"))),
        )
    }

    #[tokio::test]
    async fn test_new_session_starts_with_system_prompt() {
        let manager = manager();
        let (handle, is_new) = manager.get_or_create(None);
        assert!(is_new);

        let state = handle.state.lock().await;
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_same_id_returns_same_session() {
        let manager = manager();
        let (first, _) = manager.get_or_create(Some("conv-1"));
        first.state.lock().await.messages.push(ChatMessage::user("hello"));

        let (second, is_new) = manager.get_or_create(Some("conv-1"));
        assert!(!is_new);
        assert_eq!(second.state.lock().await.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_resume_from_storage() {
        let storage = AnalyticsStorage::open_in_memory().unwrap();
        storage
            .save_session(&crate::analytics::Session::new(Some("conv-1".to_string())))
            .unwrap();
        storage
            .save_message("conv-1", "system", "prompt", None, None, None)
            .unwrap();
        storage
            .save_message("conv-1", "user", "hi", None, None, None)
            .unwrap();
        storage
            .save_message(
                "conv-1",
                "assistant",
                "",
                None,
                None,
                Some(&json!([{"id": "call_1", "name": "ping_gateway", "arguments": {}}])),
            )
            .unwrap();
        storage
            .save_message("conv-1", "tool", "ok", Some("call_1"), Some("ping_gateway"), None)
            .unwrap();

        let manager = SessionManager::new(
            storage,
            Arc::new(PromptStore::new(PathBuf::from("/nonexistent"))),
        );
        let (handle, is_new) = manager.get_or_create(Some("conv-1"));
        assert!(!is_new);

        let state = handle.state.lock().await;
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.messages[2].role, Role::Assistant);
        let calls = state.messages[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(state.messages[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_cancel_installs_fresh_token() {
        let manager = manager();
        let (handle, _) = manager.get_or_create(Some("conv-1"));

        let turn_token = handle.cancel_token();
        assert!(!turn_token.is_cancelled());

        assert!(manager.cancel("conv-1"));
        assert!(turn_token.is_cancelled());
        // Next turn gets an unaborted token
        assert!(!handle.cancel_token().is_cancelled());
    }

    #[test]
    fn test_cancel_unknown_session() {
        let manager = manager();
        assert!(!manager.cancel("nope"));
    }

    #[test]
    fn test_remove_drops_memory() {
        let manager = manager();
        manager.get_or_create(Some("conv-1"));
        assert!(manager.contains("conv-1"));
        manager.remove("conv-1");
        assert!(!manager.contains("conv-1"));
    }
}
