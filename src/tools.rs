//! Tool schema types and the registry that dispatches LLM tool calls

mod registry;
mod schema;

pub use registry::ToolRegistry;
pub use schema::{ParamType, ToolCall, ToolCategory, ToolDefinition, ToolParameter, ToolResult};
