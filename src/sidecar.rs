//! Local LLM sidecar supervision
//!
//! Locates, launches, health-checks, and shuts down the Ollama process, with
//! a PID-file guard against orphans left behind by prior crashes.

mod guard;
mod supervisor;

pub use guard::PidGuard;
pub use supervisor::{ModelInfo, OllamaSupervisor, PullProgress};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("Ollama binary not found. Searched: {}", searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Ollama failed to start: {0}")]
    Startup(String),

    #[error("Sidecar HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SidecarResult<T> = Result<T, SidecarError>;
