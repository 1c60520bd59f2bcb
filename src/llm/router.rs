//! LLM router: provider selection with cloud-to-sidecar fallback

use super::error::LlmError;
use super::types::{ChatMessage, ChatResponse, ToolChoice};
use super::{AnthropicClient, LlmClient, OllamaClient, OpenAiCompatClient};
use crate::analytics::AnalyticsCollector;
use crate::config::{Backend, Settings};
use crate::tools::ToolDefinition;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const PROBE_TIMEOUT: Duration = Duration::from_millis(800);

/// Cloud candidates walked after the preferred backend
const CLOUD_ORDER: &[Backend] = &[
    Backend::Anthropic,
    Backend::OpenAi,
    Backend::Xai,
    Backend::Google,
];

/// Routes chat calls to the best available provider.
///
/// The first successful selection is cached for the router's lifetime; the
/// sidecar is always the terminal fallback. When the preferred backend loses
/// the selection, a fallback event is recorded against the session that
/// triggered it.
pub struct LlmRouter {
    settings: Settings,
    analytics: Arc<AnalyticsCollector>,
    probe_client: reqwest::Client,
    clients: Mutex<HashMap<&'static str, Arc<dyn LlmClient>>>,
    active: Mutex<Option<Arc<dyn LlmClient>>>,
    #[cfg(test)]
    online_override: Option<bool>,
}

impl LlmRouter {
    pub fn new(settings: Settings, analytics: Arc<AnalyticsCollector>) -> Self {
        Self {
            settings,
            analytics,
            probe_client: reqwest::Client::builder()
                .timeout(PROBE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            clients: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            #[cfg(test)]
            online_override: None,
        }
    }

    /// Router wired to caller-supplied clients, bypassing construction and
    /// the connectivity probe.
    #[cfg(test)]
    pub(crate) fn with_test_clients(
        settings: Settings,
        analytics: Arc<AnalyticsCollector>,
        clients: Vec<Arc<dyn LlmClient>>,
        online: bool,
    ) -> Self {
        let map: HashMap<&'static str, Arc<dyn LlmClient>> = clients
            .into_iter()
            .map(|c| (c.backend().as_str(), c))
            .collect();
        Self {
            settings,
            analytics,
            probe_client: reqwest::Client::new(),
            clients: Mutex::new(map),
            active: Mutex::new(None),
            online_override: Some(online),
        }
    }

    pub fn active_backend(&self) -> Option<Backend> {
        self.active.lock().unwrap().as_ref().map(|c| c.backend())
    }

    pub fn active_model(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.model_name().to_string())
    }

    /// Single lightweight GET deciding online/offline before any cloud
    /// provider is considered. A probe failure is "offline", not an error.
    async fn is_online(&self) -> bool {
        #[cfg(test)]
        if let Some(online) = self.online_override {
            return online;
        }

        let result = self
            .probe_client
            .get(&self.settings.connectivity_probe_url)
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success() || r.status().is_redirection())
    }

    fn has_credentials(&self, backend: Backend) -> bool {
        match backend {
            Backend::Anthropic => self.settings.anthropic_api_key.is_some(),
            Backend::OpenAi => self.settings.openai_api_key.is_some(),
            Backend::Xai => self.settings.xai_api_key.is_some(),
            Backend::Google => self.settings.google_api_key.is_some(),
            Backend::Ollama => true,
        }
    }

    fn client_for(&self, backend: Backend) -> Option<Arc<dyn LlmClient>> {
        let mut clients = self.clients.lock().unwrap();
        if let Some(client) = clients.get(backend.as_str()) {
            return Some(client.clone());
        }

        let settings = &self.settings;
        let client: Arc<dyn LlmClient> = match backend {
            Backend::Anthropic => Arc::new(AnthropicClient::new(
                settings.anthropic_api_key.clone()?,
                settings.anthropic_model.clone(),
            )),
            Backend::OpenAi => Arc::new(OpenAiCompatClient::openai(
                settings.openai_api_key.clone()?,
                settings.openai_model.clone(),
            )),
            Backend::Xai => Arc::new(OpenAiCompatClient::xai(
                settings.xai_api_key.clone()?,
                settings.xai_model.clone(),
            )),
            Backend::Google => Arc::new(OpenAiCompatClient::google(
                settings.google_api_key.clone()?,
                settings.google_model.clone(),
            )),
            Backend::Ollama => Arc::new(OllamaClient::new(
                &settings.ollama_host,
                settings.ollama_model.clone(),
            )),
        };
        clients.insert(backend.as_str(), client.clone());
        Some(client)
    }

    /// Priority list: preferred first, remaining cloud backends, sidecar last.
    fn candidates(&self) -> Vec<Backend> {
        let preferred = self.settings.preferred_backend;
        let mut list = vec![preferred];
        for &backend in CLOUD_ORDER {
            if backend != preferred {
                list.push(backend);
            }
        }
        if preferred != Backend::Ollama {
            list.push(Backend::Ollama);
        }
        list
    }

    /// Select (and cache) the best available client.
    async fn get_client(&self, session_id: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        if let Some(client) = self.active.lock().unwrap().clone() {
            return Ok(client);
        }

        let preferred = self.settings.preferred_backend;
        let online = self.is_online().await;
        if !online {
            tracing::info!("Connectivity probe failed, skipping cloud providers");
        }

        for backend in self.candidates() {
            if backend.is_cloud() && !online {
                continue;
            }
            if !self.has_credentials(backend) {
                continue;
            }
            let Some(client) = self.client_for(backend) else {
                continue;
            };
            if !client.is_available().await {
                tracing::debug!(backend = backend.as_str(), "Backend not available");
                continue;
            }

            if backend != preferred {
                let reason = if preferred.is_cloud() && !online {
                    format!("{} unreachable (offline)", preferred.as_str())
                } else {
                    format!("{} not available", preferred.as_str())
                };
                tracing::warn!(
                    from = preferred.as_str(),
                    to = backend.as_str(),
                    "LLM backend fallback"
                );
                self.analytics
                    .record_fallback(session_id, preferred.as_str(), backend.as_str(), &reason);
            }

            tracing::info!(
                backend = backend.as_str(),
                model = client.model_name(),
                "Selected LLM backend"
            );
            *self.active.lock().unwrap() = Some(client.clone());
            return Ok(client);
        }

        Err(LlmError::unavailable(
            "No LLM backend available. Ensure the local sidecar is running or set a cloud API key.",
        ))
    }

    /// Send a chat request to the best available backend, recording timing
    /// and token usage against the session.
    pub async fn chat(
        &self,
        session_id: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f32,
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError> {
        let client = self.get_client(session_id).await?;

        tracing::debug!(
            message_count = messages.len(),
            tool_count = tools.len(),
            backend = client.backend().as_str(),
            "Sending chat request"
        );

        let start = Instant::now();
        let result = client.chat(messages, tools, temperature, tool_choice).await;
        let duration_ms = i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX);

        match result {
            Ok(response) => {
                let usage = response.usage.unwrap_or_default();
                tracing::info!(
                    duration_ms,
                    has_tool_calls = response.has_tool_calls(),
                    "LLM response received"
                );
                self.analytics.record_llm_call(
                    session_id,
                    duration_ms,
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    client.model_name(),
                );
                Ok(response)
            }
            Err(e) => {
                tracing::error!(duration_ms, error = %e, "LLM chat failed");
                self.analytics
                    .record_error(session_id, &format!("LLM chat failed: {e}"));
                Err(e)
            }
        }
    }

    /// Availability of each configured backend, for the health endpoint.
    pub async fn availability(&self) -> HashMap<String, bool> {
        let mut status = HashMap::new();
        for backend in self.candidates() {
            if !self.has_credentials(backend) {
                status.insert(backend.as_str().to_string(), false);
                continue;
            }
            let available = match self.client_for(backend) {
                Some(client) => client.is_available().await,
                None => false,
            };
            status.insert(backend.as_str().to_string(), available);
        }
        status
    }

    /// Drop cached clients and the active selection.
    pub fn close(&self) {
        self.active.lock().unwrap().take();
        self.clients.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{AnalyticsStorage, EventType};
    use crate::llm::testing::ScriptedClient;
    use std::path::PathBuf;

    fn settings(preferred: Backend) -> Settings {
        Settings {
            preferred_backend: preferred,
            ollama_host: "http://127.0.0.1:11434".to_string(),
            ollama_model: "ministral:latest".to_string(),
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-5-20250929".to_string(),
            openai_api_key: Some("sk-test".to_string()),
            openai_model: "gpt-4o-mini".to_string(),
            xai_api_key: None,
            xai_model: "grok-3-mini".to_string(),
            google_api_key: None,
            google_model: "gemini-2.0-flash".to_string(),
            connectivity_probe_url: "http://probe.invalid".to_string(),
            port: 0,
            user_data_dir: PathBuf::from("/tmp"),
        }
    }

    fn collector() -> Arc<AnalyticsCollector> {
        Arc::new(AnalyticsCollector::new(
            AnalyticsStorage::open_in_memory().unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_preferred_backend_selected() {
        let analytics = collector();
        analytics.start_session(Some("s1".to_string()));

        let openai = Arc::new(ScriptedClient::text(Backend::OpenAi, "gpt-4o-mini", "hello"));
        let ollama = Arc::new(ScriptedClient::text(Backend::Ollama, "ministral", "hi"));
        let router = LlmRouter::with_test_clients(
            settings(Backend::OpenAi),
            analytics.clone(),
            vec![openai, ollama],
            true,
        );

        let response = router
            .chat("s1", &[ChatMessage::user("hi")], &[], 0.3, ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(response.content(), "hello");
        assert_eq!(router.active_backend(), Some(Backend::OpenAi));
        assert!(!analytics.get_session("s1").unwrap().had_fallback);
    }

    #[tokio::test]
    async fn test_fallback_to_sidecar_when_offline() {
        let analytics = collector();
        analytics.start_session(Some("s1".to_string()));

        let openai = Arc::new(ScriptedClient::text(Backend::OpenAi, "gpt-4o-mini", "cloud"));
        let ollama = Arc::new(ScriptedClient::text(Backend::Ollama, "ministral", "local"));
        let router = LlmRouter::with_test_clients(
            settings(Backend::OpenAi),
            analytics.clone(),
            vec![openai, ollama],
            false, // offline
        );

        let response = router
            .chat("s1", &[ChatMessage::user("hi")], &[], 0.3, ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(response.content(), "local");
        assert_eq!(router.active_backend(), Some(Backend::Ollama));

        let session = analytics.get_session("s1").unwrap();
        assert!(session.had_fallback);

        let events = analytics.storage().get_events("s1").unwrap();
        let fallback = events
            .iter()
            .find(|e| e.event_type == EventType::Fallback)
            .unwrap();
        assert_eq!(fallback.metadata["from_backend"], "openai");
        assert_eq!(fallback.metadata["to_backend"], "ollama");
    }

    #[tokio::test]
    async fn test_fallback_when_preferred_unavailable() {
        let analytics = collector();
        analytics.start_session(Some("s1".to_string()));

        let openai = Arc::new(
            ScriptedClient::text(Backend::OpenAi, "gpt-4o-mini", "cloud").unavailable(),
        );
        let ollama = Arc::new(ScriptedClient::text(Backend::Ollama, "ministral", "local"));
        let router = LlmRouter::with_test_clients(
            settings(Backend::OpenAi),
            analytics.clone(),
            vec![openai, ollama],
            true,
        );

        let response = router
            .chat("s1", &[ChatMessage::user("hi")], &[], 0.3, ToolChoice::Auto)
            .await
            .unwrap();
        assert_eq!(response.content(), "local");
        assert!(analytics.get_session("s1").unwrap().had_fallback);
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let analytics = collector();
        analytics.start_session(Some("s1".to_string()));

        let ollama = Arc::new(
            ScriptedClient::text(Backend::Ollama, "ministral", "local").unavailable(),
        );
        let router = LlmRouter::with_test_clients(
            settings(Backend::Ollama),
            analytics.clone(),
            vec![ollama],
            false,
        );

        let err = router
            .chat("s1", &[ChatMessage::user("hi")], &[], 0.3, ToolChoice::Auto)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::llm::LlmErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_llm_call_event_recorded() {
        let analytics = collector();
        analytics.start_session(Some("s1".to_string()));

        let ollama = Arc::new(ScriptedClient::text(Backend::Ollama, "ministral", "hi"));
        let router = LlmRouter::with_test_clients(
            settings(Backend::Ollama),
            analytics.clone(),
            vec![ollama],
            true,
        );

        router
            .chat("s1", &[ChatMessage::user("hi")], &[], 0.3, ToolChoice::Auto)
            .await
            .unwrap();

        let events = analytics.storage().get_events("s1").unwrap();
        let llm_call = events
            .iter()
            .find(|e| e.event_type == EventType::LlmCall)
            .unwrap();
        assert!(llm_call.duration_ms.is_some());
        assert_eq!(llm_call.metadata["model"], "ministral");
    }

    #[test]
    fn test_candidate_order() {
        let analytics = collector();
        let router = LlmRouter::new(settings(Backend::OpenAi), analytics);
        let candidates = router.candidates();
        assert_eq!(candidates[0], Backend::OpenAi);
        assert_eq!(*candidates.last().unwrap(), Backend::Ollama);
        // No duplicates
        assert_eq!(
            candidates.len(),
            candidates.iter().collect::<std::collections::HashSet<_>>().len()
        );
    }
}
