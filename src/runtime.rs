//! Agent runtime: session management and the multi-turn tool loop

mod agent_loop;
mod session;

pub use agent_loop::{
    AgentError, AgentRuntime, ChatOutcome, ResponseDiagnostics, ToolCallRecord, ToolUsedInfo,
    MAX_TOOL_ITERATIONS,
};
pub use session::{SessionHandle, SessionManager, SessionState};
