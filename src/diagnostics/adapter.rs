//! Network adapter status diagnostic

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
struct AdapterInput {
    interface_name: Option<String>,
}

/// Check if network adapters are enabled and operational
pub struct CheckAdapterStatus {
    executor: CommandExecutor,
}

impl CheckAdapterStatus {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    async fn run_unix(&self, interface_name: Option<&str>) -> DiagnosticResult {
        let platform = self.executor.platform();
        let result = self.executor.run_shell("ifconfig -a", None).await;

        if !result.success() {
            return DiagnosticResult::failure(
                "check_adapter_status",
                platform,
                "Failed to get network interfaces",
            )
            .with_raw_output(result.stderr)
            .with_suggestions(["Check if ifconfig command is available"]);
        }

        let mut adapters = parse_ifconfig_adapters(&result.stdout);
        if let Some(name) = interface_name {
            adapters.retain(|a| a["name"].as_str() == Some(name));
        }

        Self::summarize(platform, adapters, result.stdout)
    }

    async fn run_windows(&self, interface_name: Option<&str>) -> DiagnosticResult {
        let platform = self.executor.platform();
        let cmd = "Get-NetAdapter | Select-Object Name, InterfaceDescription, Status, \
                   MacAddress, MediaConnectionState | ConvertTo-Json";
        let result = self.executor.run_shell(cmd, None).await;

        if !result.success() {
            return DiagnosticResult::failure(
                "check_adapter_status",
                platform,
                "Failed to get network adapters",
            )
            .with_raw_output(result.stderr)
            .with_suggestions(["Check that PowerShell and the NetAdapter module are available"]);
        }

        let mut adapters = parse_netadapter_json(&result.stdout);
        if let Some(name) = interface_name {
            adapters.retain(|a| a["name"].as_str() == Some(name));
        }

        Self::summarize(platform, adapters, result.stdout)
    }

    fn summarize(platform: Platform, adapters: Vec<Value>, raw: String) -> DiagnosticResult {
        let real: Vec<&Value> = adapters
            .iter()
            .filter(|a| a["type"].as_str() != Some("loopback"))
            .collect();
        let active_count = real
            .iter()
            .filter(|a| a["status"].as_str() == Some("up"))
            .count();
        let connected_count = real
            .iter()
            .filter(|a| a["is_connected"].as_bool() == Some(true))
            .count();
        let primary = real
            .iter()
            .find(|a| {
                a["has_ip"].as_bool() == Some(true) && a["is_connected"].as_bool() == Some(true)
            })
            .and_then(|a| a["name"].as_str())
            .map(str::to_string);

        let mut suggestions: Vec<&str> = Vec::new();
        if active_count == 0 {
            suggestions.push("All network adapters are disabled");
            suggestions.push("ACTION: Call enable_wifi to enable the WiFi adapter");
        } else if connected_count == 0 {
            suggestions.push("CRITICAL: No network adapters are connected to any network");
            suggestions.push("ACTION: Call enable_wifi to enable WiFi and attempt connection");
            suggestions.push("If WiFi is already on, user needs to manually select a network");
        }

        let mut data = Map::new();
        data.insert("adapters".to_string(), json!(adapters));
        data.insert("active_count".to_string(), json!(active_count));
        data.insert("connected_count".to_string(), json!(connected_count));
        data.insert(
            "has_network_connection".to_string(),
            json!(connected_count > 0),
        );
        data.insert("primary_interface".to_string(), json!(primary));

        DiagnosticResult::success("check_adapter_status", platform, data)
            .with_raw_output(raw)
            .with_suggestions(suggestions)
    }
}

#[async_trait]
impl Diagnostic for CheckAdapterStatus {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "check_adapter_status".to_string(),
            display_name: "Check Adapter Status".to_string(),
            description: "Check if network adapters are enabled and their connection status. \
                          Use this first to verify physical/link layer connectivity."
                .to_string(),
            category: ToolCategory::Connectivity,
            osi_layer: 1,
            parameters: vec![ToolParameter::optional(
                "interface_name",
                ParamType::String,
                "Specific interface to check (e.g., 'en0', 'Ethernet'). \
                 If not provided, checks all interfaces.",
            )],
        }
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let input: AdapterInput = serde_json::from_value(args).unwrap_or_default();
        let interface = input.interface_name.as_deref();

        match self.executor.platform() {
            Platform::Macos | Platform::Linux => self.run_unix(interface).await,
            Platform::Windows => self.run_windows(interface).await,
            Platform::Unknown => DiagnosticResult::failure(
                "check_adapter_status",
                Platform::Unknown,
                "Unsupported platform: unknown",
            ),
        }
    }
}

/// Parse `ifconfig -a` output into an adapter list.
pub(crate) fn parse_ifconfig_adapters(output: &str) -> Vec<Value> {
    let mut adapters: Vec<Value> = Vec::new();
    let mut current: Option<Map<String, Value>> = None;

    for line in output.lines() {
        let starts_block = !line.starts_with(['\t', ' ']) && line.contains(':') && !line.is_empty();

        if starts_block {
            if let Some(adapter) = current.take() {
                adapters.push(Value::Object(adapter));
            }

            let name = line.split(':').next().unwrap_or("").to_string();
            let flags = line
                .find('<')
                .and_then(|start| line.find('>').map(|end| (start, end)))
                .map(|(start, end)| line.get(start + 1..end).unwrap_or(""))
                .unwrap_or("");

            let iface_type = if name == "lo0" || name == "lo" {
                "loopback"
            } else if name.starts_with("en") || name.starts_with("eth") || name.starts_with("wl") {
                "ethernet"
            } else if name.starts_with("utun")
                || name.starts_with("bridge")
                || name.starts_with("awdl")
                || name.starts_with("llw")
                || name.starts_with("docker")
                || name.starts_with("veth")
            {
                "virtual"
            } else {
                "other"
            };

            let mut adapter = Map::new();
            adapter.insert("name".to_string(), json!(name));
            adapter.insert(
                "status".to_string(),
                json!(if flags.split(',').any(|f| f == "UP") { "up" } else { "down" }),
            );
            adapter.insert("type".to_string(), json!(iface_type));
            adapter.insert("mac_address".to_string(), Value::Null);
            adapter.insert("has_ip".to_string(), json!(false));
            adapter.insert(
                "is_connected".to_string(),
                json!(flags.split(',').any(|f| f == "RUNNING")),
            );
            current = Some(adapter);
        } else if let Some(adapter) = current.as_mut() {
            let trimmed = line.trim();
            if let Some(mac) = trimmed.strip_prefix("ether ") {
                adapter.insert(
                    "mac_address".to_string(),
                    json!(mac.split_whitespace().next()),
                );
            } else if trimmed.starts_with("inet ") {
                adapter.insert("has_ip".to_string(), json!(true));
            } else if let Some(status) = trimmed.strip_prefix("status: ") {
                adapter.insert("is_connected".to_string(), json!(status == "active"));
            }
        }
    }

    if let Some(adapter) = current {
        adapters.push(Value::Object(adapter));
    }

    // Drop virtual interfaces without an address to keep the output readable
    adapters.retain(|a| {
        let t = a["type"].as_str().unwrap_or("other");
        (t != "virtual" && t != "loopback") || a["has_ip"].as_bool() == Some(true)
    });

    adapters
}

/// Parse `Get-NetAdapter | ConvertTo-Json` output.
pub(crate) fn parse_netadapter_json(output: &str) -> Vec<Value> {
    let parsed: Value = match serde_json::from_str(output) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    // PowerShell emits a bare object for a single adapter
    let items: Vec<Value> = match parsed {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| {
            let status = item["Status"].as_str().unwrap_or("").to_lowercase();
            let connected = item["MediaConnectionState"].as_i64() == Some(1)
                || item["MediaConnectionState"].as_str() == Some("Connected")
                || status == "up";
            json!({
                "name": item["Name"],
                "display_name": item["InterfaceDescription"],
                "status": if status == "up" { "up" } else { "down" },
                "type": "ethernet",
                "mac_address": item["MacAddress"],
                "has_ip": connected,
                "is_connected": connected,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IFCONFIG_OUTPUT: &str = "\
lo0: flags=8049<UP,LOOPBACK,RUNNING,MULTICAST> mtu 16384
\tinet 127.0.0.1 netmask 0xff000000
en0: flags=8863<UP,BROADCAST,SMART,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\tether aa:bb:cc:dd:ee:ff
\tinet 192.168.1.50 netmask 0xffffff00 broadcast 192.168.1.255
\tstatus: active
en1: flags=8822<BROADCAST,SMART,SIMPLEX,MULTICAST> mtu 1500
\tether 11:22:33:44:55:66
\tstatus: inactive
awdl0: flags=8943<UP,BROADCAST,RUNNING,PROMISC,SIMPLEX,MULTICAST> mtu 1484";

    #[test]
    fn test_parse_ifconfig() {
        let adapters = parse_ifconfig_adapters(IFCONFIG_OUTPUT);
        // awdl0 is virtual without IP and dropped; lo0 has an address and stays
        let names: Vec<&str> = adapters.iter().filter_map(|a| a["name"].as_str()).collect();
        assert_eq!(names, vec!["lo0", "en0", "en1"]);

        let en0 = &adapters[1];
        assert_eq!(en0["status"], "up");
        assert_eq!(en0["is_connected"], true);
        assert_eq!(en0["has_ip"], true);
        assert_eq!(en0["mac_address"], "aa:bb:cc:dd:ee:ff");

        let en1 = &adapters[2];
        assert_eq!(en1["status"], "down");
        assert_eq!(en1["is_connected"], false);
    }

    #[test]
    fn test_parse_netadapter_array() {
        let output = r#"[
            {"Name": "Ethernet", "InterfaceDescription": "Intel(R) I219", "Status": "Up",
             "MacAddress": "AA-BB-CC-DD-EE-FF", "MediaConnectionState": 1},
            {"Name": "Wi-Fi", "InterfaceDescription": "Intel(R) Wireless", "Status": "Disconnected",
             "MacAddress": "11-22-33-44-55-66", "MediaConnectionState": 2}
        ]"#;
        let adapters = parse_netadapter_json(output);
        assert_eq!(adapters.len(), 2);
        assert_eq!(adapters[0]["is_connected"], true);
        assert_eq!(adapters[1]["is_connected"], false);
    }

    #[test]
    fn test_parse_netadapter_single_object() {
        let output = r#"{"Name": "Ethernet", "Status": "Up", "MediaConnectionState": 1}"#;
        let adapters = parse_netadapter_json(output);
        assert_eq!(adapters.len(), 1);
    }

    #[test]
    fn test_summarize_disconnected() {
        let adapters = parse_ifconfig_adapters(
            "en0: flags=8822<BROADCAST,SMART,SIMPLEX,MULTICAST> mtu 1500\n\tether aa:bb:cc:dd:ee:ff",
        );
        let result = CheckAdapterStatus::summarize(Platform::Macos, adapters, String::new());
        assert!(result.success);
        assert_eq!(result.data["has_network_connection"], false);
        assert!(result
            .suggestions
            .iter()
            .any(|s| s.contains("All network adapters are disabled")));
    }
}
