//! HTTP API for the diagnostics assistant

mod handlers;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::analytics::{AnalyticsCollector, AnalyticsStorage};
use crate::llm::LlmRouter;
use crate::runtime::AgentRuntime;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub router: Arc<LlmRouter>,
    pub registry: Arc<ToolRegistry>,
    pub collector: Arc<AnalyticsCollector>,
    pub storage: AnalyticsStorage,
}
