//! netmedic - AI-assisted desktop diagnostics assistant
//!
//! A Rust backend driving an LLM through a multi-turn tool loop over
//! diagnostic probes of the host, with a locally-supervised model sidecar
//! as the always-available fallback provider.

mod analytics;
mod api;
mod config;
mod diagnostics;
mod llm;
mod preferences;
mod prompts;
mod runtime;
mod sidecar;
mod tools;

use analytics::{AnalyticsCollector, AnalyticsStorage};
use api::{create_router, AppState};
use config::{Backend, Settings};
use diagnostics::CommandExecutor;
use llm::LlmRouter;
use preferences::PreferencesManager;
use prompts::PromptStore;
use runtime::{AgentRuntime, SessionManager};
use sidecar::OllamaSupervisor;
use std::net::SocketAddr;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = Settings::from_env();
    std::fs::create_dir_all(&settings.user_data_dir)?;
    std::fs::create_dir_all(settings.log_dir())?;

    // Logging: structured JSON to stdout plus daily-rolling files
    let file_appender = tracing_appender::rolling::daily(settings.log_dir(), "netmedic.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "netmedic=info,tower_http=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    // Preferences may override the sidecar model
    let prefs = PreferencesManager::load(settings.preferences_path());
    if !prefs.get().preferred_model.is_empty() {
        settings.ollama_model = prefs.get().preferred_model.clone();
    }

    // Storage and analytics
    let db_path = settings.database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let storage = AnalyticsStorage::open(&db_path)?;
    let collector = Arc::new(AnalyticsCollector::new(storage.clone()));

    // Tool registry with every diagnostic installed
    let mut registry = ToolRegistry::new();
    diagnostics::register_all(&mut registry, CommandExecutor::default());
    registry.set_analytics(collector.clone());
    let registry = Arc::new(registry);
    tracing::info!(tools = registry.len(), "Tool registry initialized");

    // LLM router
    let router = Arc::new(LlmRouter::new(settings.clone(), collector.clone()));
    tracing::info!(
        preferred = settings.preferred_backend.as_str(),
        "LLM router initialized"
    );

    // Sidecar supervisor. Started eagerly when the sidecar is the preferred
    // backend or no cloud credentials exist; failure to start is not fatal,
    // the router will simply find the backend unavailable.
    let (sidecar_host, sidecar_port) = parse_host_port(&settings.ollama_host);
    let supervisor = Arc::new(OllamaSupervisor::new(
        &sidecar_host,
        sidecar_port,
        settings.models_dir(),
        None,
        false,
        settings.pid_file("ollama"),
    ));
    let cloudless = settings.anthropic_api_key.is_none()
        && settings.openai_api_key.is_none()
        && settings.xai_api_key.is_none()
        && settings.google_api_key.is_none();
    if settings.preferred_backend == Backend::Ollama || cloudless {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = supervisor.start().await {
                tracing::warn!(error = %e, "Sidecar did not start");
            }
        });
    }

    // Agent runtime
    let prompt_store = Arc::new(PromptStore::new(settings.prompts_dir()));
    let sessions = Arc::new(SessionManager::new(storage.clone(), prompt_store));
    let runtime = Arc::new(AgentRuntime::new(
        router.clone(),
        registry.clone(),
        collector.clone(),
        sessions,
    ));

    let state = AppState {
        runtime,
        router: router.clone(),
        registry,
        collector,
        storage,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(cors);

    let addr = SocketAddr::from(([127, 0, 0, 1], settings.port));
    tracing::info!("netmedic listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Orderly teardown: the sidecar first, then provider clients
    supervisor.stop().await;
    router.close();

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

/// Split a sidecar base URL like `http://127.0.0.1:11434` into host and port.
fn parse_host_port(url: &str) -> (String, u16) {
    let trimmed = url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    match trimmed.rsplit_once(':') {
        Some((host, port)) => (
            host.to_string(),
            port.parse().unwrap_or(11434),
        ),
        None => (trimmed.to_string(), 11434),
    }
}
