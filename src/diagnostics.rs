//! Diagnostic tool implementations
//!
//! Each diagnostic is a platform-aware probe or remediation of the host.
//! Diagnostics never return `Err` to the dispatcher: failures are converted
//! into a failed [`DiagnosticResult`] carrying suggestions for the model to
//! relay to the user.

pub mod platform;

mod adapter;
mod connectivity;
mod dns;
mod ip_config;
mod ip_reset;
mod process_mgmt;
mod temp_files;
mod wifi;

pub use adapter::CheckAdapterStatus;
pub use connectivity::{PingDns, PingGateway};
pub use dns::TestDnsResolution;
pub use ip_config::GetIpConfig;
pub use ip_reset::{FlushDnsCache, RenewDhcpLease};
pub use platform::{CommandExecutor, CommandOutput, Platform};
pub use process_mgmt::KillProcess;
pub use temp_files::CleanTempFiles;
pub use wifi::EnableWifi;

use crate::tools::{ToolDefinition, ToolRegistry};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Standardized result from any diagnostic function
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticResult {
    pub success: bool,
    pub function_name: String,
    pub platform: Platform,
    pub data: Map<String, Value>,
    pub raw_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub suggestions: Vec<String>,
}

impl DiagnosticResult {
    pub fn success(function_name: &str, platform: Platform, data: Map<String, Value>) -> Self {
        Self {
            success: true,
            function_name: function_name.to_string(),
            platform,
            data,
            raw_output: String::new(),
            error: None,
            suggestions: Vec::new(),
        }
    }

    pub fn failure(function_name: &str, platform: Platform, error: impl Into<String>) -> Self {
        Self {
            success: false,
            function_name: function_name.to_string(),
            platform,
            data: Map::new(),
            raw_output: String::new(),
            error: Some(error.into()),
            suggestions: Vec::new(),
        }
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = raw.into();
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    /// Format the result for LLM consumption
    pub fn to_llm_response(&self) -> String {
        let mut lines = vec![format!("## {} Results", self.function_name)];

        if self.success {
            lines.push("**Status**: Success".to_string());
        } else {
            lines.push(format!(
                "**Status**: Failed - {}",
                self.error.as_deref().unwrap_or("unknown error")
            ));
        }

        lines.push(format!("**Platform**: {}", self.platform.as_str()));

        if !self.data.is_empty() {
            lines.push("\n### Data".to_string());
            for (key, value) in &self.data {
                lines.push(format!("- **{key}**: {value}"));
            }
        }

        if !self.suggestions.is_empty() {
            lines.push("\n### Suggestions".to_string());
            for suggestion in &self.suggestions {
                lines.push(format!("- {suggestion}"));
            }
        }

        lines.join("\n")
    }
}

/// Trait implemented by every diagnostic tool.
///
/// `run` receives the raw argument object from the LLM and is responsible for
/// decoding it into its own typed input struct (invalid arguments become a
/// failed result, never a panic). Long-running diagnostics should observe the
/// cancellation token.
#[async_trait]
pub trait Diagnostic: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn run(&self, args: Value, cancel: CancellationToken) -> DiagnosticResult;
}

/// Register every diagnostic with the tool registry.
///
/// Called once from the composition root; tests register the subset they
/// exercise on their own registry instances.
pub fn register_all(registry: &mut ToolRegistry, executor: CommandExecutor) {
    registry.register(CheckAdapterStatus::new(executor.clone()));
    registry.register(GetIpConfig::new(executor.clone()));
    registry.register(PingGateway::new(executor.clone()));
    registry.register(PingDns::new(executor.clone()));
    registry.register(TestDnsResolution::new(executor.clone()));
    registry.register(EnableWifi::new(executor.clone()));
    registry.register(RenewDhcpLease::new(executor.clone()));
    registry.register(FlushDnsCache::new(executor.clone()));
    registry.register(KillProcess::new(executor.clone()));
    registry.register(CleanTempFiles::new(executor));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_response_success() {
        let mut data = Map::new();
        data.insert("reachable".to_string(), json!(true));
        let result = DiagnosticResult::success("ping_gateway", Platform::Linux, data)
            .with_suggestions(["All good"]);

        let rendered = result.to_llm_response();
        assert!(rendered.contains("## ping_gateway Results"));
        assert!(rendered.contains("**Status**: Success"));
        assert!(rendered.contains("- **reachable**: true"));
        assert!(rendered.contains("- All good"));
    }

    #[test]
    fn test_llm_response_failure() {
        let result = DiagnosticResult::failure("enable_wifi", Platform::Linux, "no such interface");
        let rendered = result.to_llm_response();
        assert!(rendered.contains("**Status**: Failed - no such interface"));
    }
}
