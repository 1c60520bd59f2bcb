//! IP stack remediations: DHCP lease renewal and DNS cache flush
//!
//! Both tools mutate host state and verify by re-reading configuration
//! after the mutation.

use super::ip_config::{is_apipa, parse_ifconfig_addresses};
use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
struct RenewInput {
    interface_name: Option<String>,
}

/// Release and renew the DHCP lease
pub struct RenewDhcpLease {
    executor: CommandExecutor,
}

impl RenewDhcpLease {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    async fn current_ip(&self, interface: &str) -> Option<String> {
        let result = self
            .executor
            .run_shell(&format!("ifconfig {interface}"), None)
            .await;
        parse_ifconfig_addresses(&result.stdout)
            .first()
            .and_then(|i| i["ip_address"].as_str().map(str::to_string))
    }
}

#[async_trait]
impl Diagnostic for RenewDhcpLease {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "renew_dhcp_lease".to_string(),
            display_name: "Renew DHCP Lease".to_string(),
            description: "Release and renew the DHCP lease to obtain a fresh IP address. Use \
                          when an APIPA (169.254.x.x) address or a stale lease is suspected."
                .to_string(),
            category: ToolCategory::IpConfig,
            osi_layer: 3,
            parameters: vec![ToolParameter::optional(
                "interface_name",
                ParamType::String,
                "Interface to renew. macOS default: en0, Windows renews all adapters.",
            )],
        }
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();
        let input: RenewInput = serde_json::from_value(args).unwrap_or_default();

        match platform {
            Platform::Macos => {
                let interface = input.interface_name.unwrap_or_else(|| "en0".to_string());
                let before = self.current_ip(&interface).await;

                let renew = self
                    .executor
                    .run_shell(
                        &format!("sudo ipconfig set {interface} DHCP"),
                        Some(Duration::from_secs(30)),
                    )
                    .await;
                if !renew.success() {
                    return DiagnosticResult::failure(
                        "renew_dhcp_lease",
                        platform,
                        format!("Failed to renew DHCP lease on {interface}"),
                    )
                    .with_raw_output(renew.stderr)
                    .with_suggestions([
                        "Administrator privileges are required to renew the lease",
                        "Try toggling the network service in System Preferences",
                    ]);
                }

                // DHCP can take a moment to hand out the new address
                tokio::time::sleep(Duration::from_secs(2)).await;
                let after = self.current_ip(&interface).await;
                verdict(platform, &interface, before, after)
            }
            Platform::Windows => {
                let release = self
                    .executor
                    .run_shell("ipconfig /release", Some(Duration::from_secs(30)))
                    .await;
                let renew = self
                    .executor
                    .run_shell("ipconfig /renew", Some(Duration::from_secs(60)))
                    .await;

                if !renew.success() {
                    return DiagnosticResult::failure(
                        "renew_dhcp_lease",
                        platform,
                        "ipconfig /renew failed",
                    )
                    .with_raw_output(format!("{}\n{}", release.stderr, renew.stderr))
                    .with_suggestions([
                        "Run the command prompt as Administrator",
                        "Check that the DHCP Client service is running",
                    ]);
                }

                let verify = self.executor.run_shell("ipconfig", None).await;
                let got_apipa = verify.stdout.contains("169.254.");
                let mut data = Map::new();
                data.insert("renewed".to_string(), json!(!got_apipa));
                data.insert("apipa_after_renew".to_string(), json!(got_apipa));

                if got_apipa {
                    DiagnosticResult::failure(
                        "renew_dhcp_lease",
                        platform,
                        "Renewal completed but the adapter still has an APIPA address",
                    )
                    .with_data(data)
                    .with_raw_output(verify.stdout)
                    .with_suggestions([
                        "DHCP server is not responding",
                        "Check the connection to the router",
                    ])
                } else {
                    DiagnosticResult::success("renew_dhcp_lease", platform, data)
                        .with_raw_output(verify.stdout)
                        .with_suggestions(["DHCP lease renewed"])
                }
            }
            Platform::Linux => {
                let interface = input.interface_name.unwrap_or_else(|| "eth0".to_string());
                let before = self.current_ip(&interface).await;

                let renew = self
                    .executor
                    .run_shell(
                        &format!("sudo dhclient -r {interface} && sudo dhclient {interface}"),
                        Some(Duration::from_secs(60)),
                    )
                    .await;
                if !renew.success() {
                    return DiagnosticResult::failure(
                        "renew_dhcp_lease",
                        platform,
                        format!("Failed to renew DHCP lease on {interface}"),
                    )
                    .with_raw_output(renew.stderr)
                    .with_suggestions([
                        "Root privileges are required",
                        "On NetworkManager systems try: nmcli connection up <name>",
                    ]);
                }

                let after = self.current_ip(&interface).await;
                verdict(platform, &interface, before, after)
            }
            Platform::Unknown => DiagnosticResult::failure(
                "renew_dhcp_lease",
                Platform::Unknown,
                "Unsupported platform",
            ),
        }
    }
}

fn verdict(
    platform: Platform,
    interface: &str,
    before: Option<String>,
    after: Option<String>,
) -> DiagnosticResult {
    let apipa_after = after.as_deref().map(is_apipa).unwrap_or(false);
    let mut data = Map::new();
    data.insert("interface".to_string(), json!(interface));
    data.insert("ip_before".to_string(), json!(before));
    data.insert("ip_after".to_string(), json!(after));
    data.insert("apipa_after_renew".to_string(), json!(apipa_after));

    match (&after, apipa_after) {
        (Some(_), false) => DiagnosticResult::success("renew_dhcp_lease", platform, data)
            .with_suggestions(["DHCP lease renewed", "Run ping_gateway to confirm connectivity"]),
        (Some(_), true) => DiagnosticResult::failure(
            "renew_dhcp_lease",
            platform,
            "Renewal completed but the interface still has an APIPA address",
        )
        .with_data(data)
        .with_suggestions(["DHCP server is not responding", "Check the router"]),
        (None, _) => DiagnosticResult::failure(
            "renew_dhcp_lease",
            platform,
            "Interface has no IP address after renewal",
        )
        .with_data(data)
        .with_suggestions(["Verify the interface name", "Run check_adapter_status"]),
    }
}

/// Flush the OS DNS resolver cache
pub struct FlushDnsCache {
    executor: CommandExecutor,
}

impl FlushDnsCache {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Diagnostic for FlushDnsCache {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "flush_dns_cache".to_string(),
            display_name: "Flush DNS Cache".to_string(),
            description: "Flush the operating system's DNS resolver cache. Use when stale DNS \
                          entries cause sites to resolve to wrong or dead addresses."
                .to_string(),
            category: ToolCategory::Dns,
            osi_layer: 7,
            parameters: vec![],
        }
    }

    async fn run(&self, _args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();

        let cmd = match platform {
            Platform::Macos => "sudo dscacheutil -flushcache && sudo killall -HUP mDNSResponder",
            Platform::Windows => "ipconfig /flushdns",
            Platform::Linux => "resolvectl flush-caches 2>/dev/null || sudo systemd-resolve --flush-caches",
            Platform::Unknown => {
                return DiagnosticResult::failure(
                    "flush_dns_cache",
                    Platform::Unknown,
                    "Unsupported platform",
                )
            }
        };

        let result = self.executor.run_shell(cmd, None).await;

        if result.success() {
            let mut data = Map::new();
            data.insert("flushed".to_string(), json!(true));
            DiagnosticResult::success("flush_dns_cache", platform, data)
                .with_raw_output(result.stdout)
                .with_suggestions([
                    "DNS cache flushed",
                    "Run test_dns_resolution to verify name resolution",
                ])
        } else {
            DiagnosticResult::failure("flush_dns_cache", platform, "Failed to flush DNS cache")
                .with_raw_output(result.stderr)
                .with_suggestions([
                    "Administrator privileges may be required",
                    "On Linux the resolver may not be systemd-resolved",
                ])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_success() {
        let result = verdict(
            Platform::Linux,
            "eth0",
            Some("169.254.1.2".to_string()),
            Some("192.168.1.20".to_string()),
        );
        assert!(result.success);
        assert_eq!(result.data["apipa_after_renew"], false);
    }

    #[test]
    fn test_verdict_still_apipa() {
        let result = verdict(
            Platform::Linux,
            "eth0",
            Some("169.254.1.2".to_string()),
            Some("169.254.3.4".to_string()),
        );
        assert!(!result.success);
        assert_eq!(result.data["apipa_after_renew"], true);
    }

    #[test]
    fn test_verdict_no_address() {
        let result = verdict(Platform::Linux, "eth0", None, None);
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("no IP address"));
    }
}
