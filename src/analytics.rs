//! Session analytics: append-only events, aggregates, and cost tracking

mod collector;
mod cost;
mod models;
mod patterns;
mod storage;

pub use collector::AnalyticsCollector;
pub use cost::CostCalculator;
pub use models::{
    CostGranularity, CostPeriod, Event, EventType, Feedback, IssueCategory, QualityMetrics,
    ResolutionPath, Session, SessionOutcome, SessionSummary, StoredMessage, ToolEvent, ToolStats,
};
pub use patterns::{categorize_by_tools, category_for_tool, lowest_osi_layer, osi_layer_for_tool};
pub use storage::{AnalyticsStorage, StorageError, StorageResult};
