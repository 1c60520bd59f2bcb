//! LLM provider abstraction
//!
//! A common capability interface over cloud providers and the local sidecar,
//! plus the router that picks between them.

mod anthropic;
mod error;
mod ollama;
mod openai;
mod router;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use anthropic::AnthropicClient;
pub use error::{LlmError, LlmErrorKind};
pub use ollama::OllamaClient;
pub use openai::OpenAiCompatClient;
pub use router::LlmRouter;
pub use types::{ChatMessage, ChatResponse, Role, TokenUsage, ToolChoice};

use crate::config::Backend;
use crate::tools::ToolDefinition;
use async_trait::async_trait;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Make a chat completion request
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f32,
        tool_choice: ToolChoice,
    ) -> Result<ChatResponse, LlmError>;

    /// Check whether the backend can serve requests right now
    async fn is_available(&self) -> bool;

    /// The concrete model this client talks to
    fn model_name(&self) -> &str;

    /// Which backend this client belongs to
    fn backend(&self) -> Backend;
}
