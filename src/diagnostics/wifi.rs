//! WiFi control diagnostic: enable the WiFi adapter
//!
//! Mutating tool. State is re-read after the mutation before success is
//! reported.

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
struct EnableWifiInput {
    interface_name: Option<String>,
    // Some models send `interface` instead of `interface_name`
    interface: Option<String>,
}

/// Enable the WiFi adapter
pub struct EnableWifi {
    executor: CommandExecutor,
}

impl EnableWifi {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    async fn run_macos(&self, interface: &str) -> DiagnosticResult {
        let platform = self.executor.platform();
        let check_cmd = format!("networksetup -getairportpower {interface}");

        let check = self.executor.run_shell(&check_cmd, None).await;
        if !check.success() {
            return DiagnosticResult::failure(
                "enable_wifi",
                platform,
                format!("Failed to check WiFi status for interface {interface}"),
            )
            .with_raw_output(check.stderr)
            .with_suggestions([
                format!("Verify that '{interface}' is a valid WiFi interface"),
                "Run 'networksetup -listallhardwareports' to find WiFi interface".to_string(),
            ]);
        }

        if check.stdout.contains("On") {
            return DiagnosticResult::success(
                "enable_wifi",
                platform,
                state_data(interface, "on", "on", false),
            )
            .with_raw_output(check.stdout)
            .with_suggestions(["WiFi was already enabled"]);
        }

        let enable = self
            .executor
            .run_shell(&format!("networksetup -setairportpower {interface} on"), None)
            .await;
        if !enable.success() {
            return DiagnosticResult::failure(
                "enable_wifi",
                platform,
                format!("Failed to enable WiFi on interface {interface}"),
            )
            .with_raw_output(enable.stderr)
            .with_suggestions([
                "You may need administrator privileges to enable WiFi",
                "Try running from an admin account",
            ]);
        }

        // Verify the change before claiming success
        let verify = self.executor.run_shell(&check_cmd, None).await;
        if verify.stdout.contains("On") {
            DiagnosticResult::success(
                "enable_wifi",
                platform,
                state_data(interface, "off", "on", true),
            )
            .with_raw_output(verify.stdout)
            .with_suggestions([
                "WiFi has been enabled successfully",
                "You may need to connect to a WiFi network manually",
                "Use 'check_adapter_status' to verify connection",
            ])
        } else {
            DiagnosticResult::failure(
                "enable_wifi",
                platform,
                "WiFi enable command succeeded but state did not change",
            )
            .with_raw_output(verify.stdout)
            .with_suggestions([
                "WiFi hardware switch may be disabled",
                "Check System Preferences > Network for WiFi status",
            ])
        }
    }

    async fn run_windows(&self, interface: &str) -> DiagnosticResult {
        let platform = self.executor.platform();
        let check_cmd = format!("netsh interface show interface name=\"{interface}\"");

        let check = self.executor.run_shell(&check_cmd, None).await;
        if !check.success() {
            return DiagnosticResult::failure(
                "enable_wifi",
                platform,
                format!("Failed to check WiFi status for interface '{interface}'"),
            )
            .with_raw_output(check.stderr)
            .with_suggestions([
                format!("Verify that '{interface}' is a valid WiFi interface"),
                "Run 'netsh interface show interface' to list available interfaces".to_string(),
            ]);
        }

        let previously_on =
            check.stdout.contains("Enabled") || check.stdout.contains("Connected");
        if previously_on {
            return DiagnosticResult::success(
                "enable_wifi",
                platform,
                state_data(interface, "on", "on", false),
            )
            .with_raw_output(check.stdout)
            .with_suggestions(["WiFi adapter was already enabled"]);
        }

        let enable = self
            .executor
            .run_shell(
                &format!("netsh interface set interface \"{interface}\" enable"),
                None,
            )
            .await;
        if !enable.success() {
            return DiagnosticResult::failure(
                "enable_wifi",
                platform,
                format!("Failed to enable WiFi interface '{interface}'"),
            )
            .with_raw_output(enable.stderr)
            .with_suggestions([
                "Administrator privileges may be required",
                "Run the command prompt as Administrator",
            ]);
        }

        let verify = self.executor.run_shell(&check_cmd, None).await;
        if verify.stdout.contains("Enabled") || verify.stdout.contains("Connected") {
            DiagnosticResult::success(
                "enable_wifi",
                platform,
                state_data(interface, "off", "on", true),
            )
            .with_raw_output(verify.stdout)
            .with_suggestions([
                "WiFi adapter has been enabled successfully",
                "You may need to connect to a WiFi network",
                "Use 'check_adapter_status' to verify connection",
            ])
        } else {
            DiagnosticResult::failure(
                "enable_wifi",
                platform,
                "WiFi enable command succeeded but adapter state did not change",
            )
            .with_raw_output(verify.stdout)
            .with_suggestions([
                "Check if the WiFi hardware switch is enabled on your device",
                "Open Network & Internet settings to verify WiFi status",
            ])
        }
    }

    async fn run_linux(&self, _interface: &str) -> DiagnosticResult {
        let platform = self.executor.platform();

        let check = self.executor.run_shell("nmcli radio wifi", None).await;
        if !check.success() {
            return DiagnosticResult::failure(
                "enable_wifi",
                platform,
                "Failed to check WiFi radio state",
            )
            .with_raw_output(check.stderr)
            .with_suggestions(["NetworkManager (nmcli) is required for WiFi control"]);
        }

        if check.stdout.contains("enabled") {
            return DiagnosticResult::success(
                "enable_wifi",
                platform,
                state_data("wifi", "on", "on", false),
            )
            .with_suggestions(["WiFi was already enabled"]);
        }

        let enable = self.executor.run_shell("nmcli radio wifi on", None).await;
        if !enable.success() {
            return DiagnosticResult::failure("enable_wifi", platform, "Failed to enable WiFi radio")
                .with_raw_output(enable.stderr);
        }

        let verify = self.executor.run_shell("nmcli radio wifi", None).await;
        if verify.stdout.contains("enabled") {
            DiagnosticResult::success("enable_wifi", platform, state_data("wifi", "off", "on", true))
                .with_suggestions(["WiFi has been enabled successfully"])
        } else {
            DiagnosticResult::failure(
                "enable_wifi",
                platform,
                "WiFi enable command succeeded but radio state did not change",
            )
            .with_suggestions(["A hardware rfkill switch may be blocking the radio"])
        }
    }
}

fn state_data(interface: &str, previous: &str, current: &str, changed: bool) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("interface".to_string(), json!(interface));
    data.insert("action".to_string(), json!("enable_wifi"));
    data.insert("previous_state".to_string(), json!(previous));
    data.insert("current_state".to_string(), json!(current));
    data.insert("changed".to_string(), json!(changed));
    data
}

#[async_trait]
impl Diagnostic for EnableWifi {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "enable_wifi".to_string(),
            display_name: "Enable WiFi".to_string(),
            description: "Enable the WiFi adapter. Use this when WiFi is disabled and needs to \
                          be turned on. On macOS uses networksetup, on Windows uses netsh."
                .to_string(),
            category: ToolCategory::Wifi,
            osi_layer: 1,
            parameters: vec![ToolParameter::optional(
                "interface_name",
                ParamType::String,
                "Specific WiFi interface to enable. macOS default: en0, Windows default: Wi-Fi. \
                 Only specify if the default doesn't work.",
            )],
        }
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let input: EnableWifiInput = serde_json::from_value(args).unwrap_or_default();
        let requested = input.interface_name.or(input.interface);

        match self.executor.platform() {
            Platform::Macos => {
                let interface = requested.unwrap_or_else(|| "en0".to_string());
                self.run_macos(&interface).await
            }
            Platform::Windows => {
                let interface = requested.unwrap_or_else(|| "Wi-Fi".to_string());
                self.run_windows(&interface).await
            }
            Platform::Linux => {
                let interface = requested.unwrap_or_else(|| "wlan0".to_string());
                self.run_linux(&interface).await
            }
            Platform::Unknown => {
                DiagnosticResult::failure("enable_wifi", Platform::Unknown, "Unsupported platform")
                    .with_suggestions(["This tool supports macOS, Windows, and Linux"])
            }
        }
    }
}
