//! Application settings and path resolution
//!
//! Everything netmedic persists lives under a single platform user-data
//! directory: the analytics database, rolling logs, the sidecar's model
//! store, its PID file, and the preferences file.

use std::path::PathBuf;

/// Preferred LLM backend, selectable via `LLM_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Anthropic,
    OpenAi,
    Xai,
    Google,
    Ollama,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Anthropic => "anthropic",
            Backend::OpenAi => "openai",
            Backend::Xai => "xai",
            Backend::Google => "google",
            Backend::Ollama => "ollama",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "anthropic" => Some(Backend::Anthropic),
            "openai" => Some(Backend::OpenAi),
            "xai" | "grok" => Some(Backend::Xai),
            "google" | "gemini" => Some(Backend::Google),
            "ollama" | "local" => Some(Backend::Ollama),
            _ => None,
        }
    }

    /// Cloud backends need reachability and credentials; the sidecar needs
    /// neither.
    pub fn is_cloud(self) -> bool {
        !matches!(self, Backend::Ollama)
    }
}

/// Resolved application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub preferred_backend: Backend,

    pub ollama_host: String,
    pub ollama_model: String,

    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub xai_api_key: Option<String>,
    pub xai_model: String,
    pub google_api_key: Option<String>,
    pub google_model: String,

    /// URL probed to decide online/offline before touching cloud providers
    pub connectivity_probe_url: String,

    pub port: u16,
    pub user_data_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        let user_data_dir = std::env::var("NETMEDIC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_user_data_dir());

        let preferred_backend = std::env::var("LLM_BACKEND")
            .ok()
            .and_then(|s| Backend::parse(&s))
            .unwrap_or(Backend::Ollama);

        Self {
            preferred_backend,
            ollama_host: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string()),
            ollama_model: std::env::var("OLLAMA_MODEL")
                .unwrap_or_else(|_| "ministral:latest".to_string()),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            anthropic_model: std::env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            xai_api_key: std::env::var("XAI_API_KEY").ok(),
            xai_model: std::env::var("XAI_MODEL").unwrap_or_else(|_| "grok-3-mini".to_string()),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
            google_model: std::env::var("GOOGLE_MODEL")
                .unwrap_or_else(|_| "gemini-2.0-flash".to_string()),
            connectivity_probe_url: std::env::var("NETMEDIC_PROBE_URL")
                .unwrap_or_else(|_| "https://www.gstatic.com/generate_204".to_string()),
            port: std::env::var("NETMEDIC_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8787),
            user_data_dir,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.user_data_dir.join("netmedic.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.user_data_dir.join("logs")
    }

    /// Directory the sidecar downloads models into. `OLLAMA_MODELS` wins so
    /// an existing system model store can be reused.
    pub fn models_dir(&self) -> PathBuf {
        std::env::var("OLLAMA_MODELS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.user_data_dir.join("models"))
    }

    pub fn pid_file(&self, name: &str) -> PathBuf {
        self.user_data_dir.join(format!(".{name}.pid"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.user_data_dir.join("preferences.json")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.user_data_dir.join("prompts")
    }
}

fn default_user_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "netmedic", "netmedic")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".netmedic"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("ollama"), Some(Backend::Ollama));
        assert_eq!(Backend::parse("OpenAI"), Some(Backend::OpenAi));
        assert_eq!(Backend::parse("grok"), Some(Backend::Xai));
        assert_eq!(Backend::parse("gemini"), Some(Backend::Google));
        assert_eq!(Backend::parse("nope"), None);
    }

    #[test]
    fn test_cloud_classification() {
        assert!(Backend::OpenAi.is_cloud());
        assert!(Backend::Anthropic.is_cloud());
        assert!(!Backend::Ollama.is_cloud());
    }

    #[test]
    fn test_derived_paths() {
        let settings = Settings {
            preferred_backend: Backend::Ollama,
            ollama_host: String::new(),
            ollama_model: String::new(),
            anthropic_api_key: None,
            anthropic_model: String::new(),
            openai_api_key: None,
            openai_model: String::new(),
            xai_api_key: None,
            xai_model: String::new(),
            google_api_key: None,
            google_model: String::new(),
            connectivity_probe_url: String::new(),
            port: 0,
            user_data_dir: PathBuf::from("/tmp/netmedic-test"),
        };

        assert_eq!(
            settings.database_path(),
            PathBuf::from("/tmp/netmedic-test/netmedic.db")
        );
        assert_eq!(
            settings.pid_file("ollama"),
            PathBuf::from("/tmp/netmedic-test/.ollama.pid")
        );
    }
}
