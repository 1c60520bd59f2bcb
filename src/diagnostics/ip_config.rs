//! IP configuration diagnostic with APIPA (DHCP failure) detection

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Deserialize)]
struct IpConfigInput {
    interface_name: Option<String>,
}

/// Get IP configuration for network interfaces
pub struct GetIpConfig {
    executor: CommandExecutor,
}

impl GetIpConfig {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    async fn run_unix(&self, interface_name: Option<&str>) -> DiagnosticResult {
        let platform = self.executor.platform();

        let ifconfig = self.executor.run_shell("ifconfig", None).await;
        if !ifconfig.success() {
            return DiagnosticResult::failure(
                "get_ip_config",
                platform,
                "Failed to get network configuration",
            )
            .with_raw_output(ifconfig.stderr);
        }

        let gateway_cmd = if platform == Platform::Macos {
            "netstat -nr | grep default | head -1 | awk '{print $2}'"
        } else {
            "ip route show default 2>/dev/null | awk '/default/ {print $3; exit}'"
        };
        let gateway_out = self.executor.run_shell(gateway_cmd, None).await;
        let gateway = Some(gateway_out.stdout.trim().to_string()).filter(|g| !g.is_empty());

        let dns_cmd = if platform == Platform::Macos {
            "scutil --dns | grep 'nameserver\\[' | head -5"
        } else {
            "grep -E '^nameserver' /etc/resolv.conf | head -5"
        };
        let dns_out = self.executor.run_shell(dns_cmd, None).await;
        let dns_servers = parse_dns_servers(&dns_out.stdout);

        let mut interfaces = parse_ifconfig_addresses(&ifconfig.stdout);
        if let Some(name) = interface_name {
            interfaces.retain(|i| i["interface"].as_str() == Some(name));
        }
        for iface in &mut interfaces {
            if let Some(obj) = iface.as_object_mut() {
                obj.insert("gateway".to_string(), json!(gateway));
                obj.insert("dns_servers".to_string(), json!(dns_servers));
            }
        }

        Self::summarize(platform, interfaces, gateway, ifconfig.stdout)
    }

    async fn run_windows(&self, interface_name: Option<&str>) -> DiagnosticResult {
        let platform = self.executor.platform();
        let cmd = "Get-NetIPConfiguration | Select-Object InterfaceAlias, IPv4Address, \
                   IPv4DefaultGateway, DNSServer | ConvertTo-Json -Depth 4";
        let result = self.executor.run_shell(cmd, None).await;

        if !result.success() {
            return DiagnosticResult::failure(
                "get_ip_config",
                platform,
                "Failed to get IP configuration",
            )
            .with_raw_output(result.stderr);
        }

        let mut interfaces = parse_netipconfiguration_json(&result.stdout);
        if let Some(name) = interface_name {
            interfaces.retain(|i| i["interface"].as_str() == Some(name));
        }
        let gateway = interfaces
            .iter()
            .find_map(|i| i["gateway"].as_str())
            .map(str::to_string);

        Self::summarize(platform, interfaces, gateway, result.stdout)
    }

    fn summarize(
        platform: Platform,
        interfaces: Vec<Value>,
        gateway: Option<String>,
        raw: String,
    ) -> DiagnosticResult {
        let has_valid_ip = interfaces.iter().any(|i| {
            i["ip_address"].as_str().is_some() && i["is_apipa"].as_bool() != Some(true)
        });
        let primary_ip = interfaces
            .iter()
            .find(|i| i["ip_address"].as_str().is_some() && i["is_apipa"].as_bool() != Some(true))
            .and_then(|i| i["ip_address"].as_str())
            .map(str::to_string);
        let any_apipa = interfaces
            .iter()
            .any(|i| i["is_apipa"].as_bool() == Some(true));

        let mut suggestions: Vec<&str> = Vec::new();
        if !has_valid_ip {
            if any_apipa {
                suggestions.push(
                    "APIPA address detected (169.254.x.x) - DHCP server is unreachable",
                );
                suggestions.push("Check physical network connection");
                suggestions.push("Verify DHCP server is running on the network");
                suggestions.push("ACTION: Call renew_dhcp_lease to request a new address");
            } else {
                suggestions.push("No IP address assigned to interface");
                suggestions.push("Run check_adapter_status to verify adapter is connected");
            }
        } else if gateway.is_none() {
            suggestions.push("No default gateway configured");
            suggestions.push("Check DHCP configuration or set static gateway");
        }

        let mut data = Map::new();
        data.insert("interfaces".to_string(), json!(interfaces));
        data.insert("has_valid_ip".to_string(), json!(has_valid_ip));
        data.insert("has_gateway".to_string(), json!(gateway.is_some()));
        data.insert("primary_ip".to_string(), json!(primary_ip));
        data.insert("primary_gateway".to_string(), json!(gateway));

        DiagnosticResult::success("get_ip_config", platform, data)
            .with_raw_output(raw)
            .with_suggestions(suggestions)
    }
}

#[async_trait]
impl Diagnostic for GetIpConfig {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_ip_config".to_string(),
            display_name: "Get IP Configuration".to_string(),
            description: "Get IP configuration including IP address, subnet, gateway, and DNS \
                          servers. Detects APIPA (169.254.x.x) addresses indicating DHCP failure."
                .to_string(),
            category: ToolCategory::IpConfig,
            osi_layer: 3,
            parameters: vec![ToolParameter::optional(
                "interface_name",
                ParamType::String,
                "Specific interface to check. If not provided, checks all active interfaces.",
            )],
        }
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let input: IpConfigInput = serde_json::from_value(args).unwrap_or_default();
        let interface = input.interface_name.as_deref();

        match self.executor.platform() {
            Platform::Macos | Platform::Linux => self.run_unix(interface).await,
            Platform::Windows => self.run_windows(interface).await,
            Platform::Unknown => {
                DiagnosticResult::failure("get_ip_config", Platform::Unknown, "Unsupported platform")
            }
        }
    }
}

pub(crate) fn is_apipa(ip: &str) -> bool {
    ip.starts_with("169.254.")
}

/// Parse `ifconfig` output into per-interface address records.
pub(crate) fn parse_ifconfig_addresses(output: &str) -> Vec<Value> {
    let inet_re = Regex::new(r"inet (\d+\.\d+\.\d+\.\d+)(?:\s+netmask\s+(\S+))?").unwrap();
    let mut interfaces: Vec<Value> = Vec::new();
    let mut current: Option<Map<String, Value>> = None;

    for line in output.lines() {
        if !line.starts_with(['\t', ' ']) && line.contains(':') && !line.is_empty() {
            if let Some(iface) = current.take() {
                interfaces.push(Value::Object(iface));
            }
            let name = line.split(':').next().unwrap_or("");
            if name == "lo0" || name == "lo" {
                current = None;
                continue;
            }
            let mut iface = Map::new();
            iface.insert("interface".to_string(), json!(name));
            iface.insert("ip_address".to_string(), Value::Null);
            iface.insert("netmask".to_string(), Value::Null);
            iface.insert("is_apipa".to_string(), json!(false));
            current = Some(iface);
        } else if let Some(iface) = current.as_mut() {
            let trimmed = line.trim();
            if trimmed.starts_with("inet ") && !trimmed.starts_with("inet6") {
                if let Some(c) = inet_re.captures(trimmed) {
                    let ip = c[1].to_string();
                    iface.insert("is_apipa".to_string(), json!(is_apipa(&ip)));
                    iface.insert("ip_address".to_string(), json!(ip));
                    if let Some(mask) = c.get(2) {
                        iface.insert("netmask".to_string(), json!(mask.as_str()));
                    }
                }
            }
        }
    }

    if let Some(iface) = current {
        interfaces.push(Value::Object(iface));
    }

    // Only interfaces that carry an address are interesting here
    interfaces.retain(|i| i["ip_address"].as_str().is_some());
    interfaces
}

pub(crate) fn parse_dns_servers(output: &str) -> Vec<String> {
    let re = Regex::new(r"(\d+\.\d+\.\d+\.\d+)").unwrap();
    let mut servers = Vec::new();
    for line in output.lines() {
        if let Some(c) = re.captures(line) {
            let server = c[1].to_string();
            if !servers.contains(&server) {
                servers.push(server);
            }
        }
    }
    servers
}

/// Parse `Get-NetIPConfiguration | ConvertTo-Json` output.
pub(crate) fn parse_netipconfiguration_json(output: &str) -> Vec<Value> {
    let parsed: Value = match serde_json::from_str(output) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    let items: Vec<Value> = match parsed {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| {
            let ip = item["IPv4Address"]
                .get("IPAddress")
                .or_else(|| item["IPv4Address"].get(0).map(|v| &v["IPAddress"]))
                .and_then(Value::as_str)
                .map(str::to_string);
            let gateway = item["IPv4DefaultGateway"]
                .get("NextHop")
                .and_then(Value::as_str)
                .map(str::to_string);
            let dns: Vec<String> = match &item["DNSServer"] {
                Value::Array(servers) => servers
                    .iter()
                    .filter_map(|s| s["ServerAddresses"].as_str().map(str::to_string))
                    .collect(),
                other => other["ServerAddresses"]
                    .as_str()
                    .map(|s| vec![s.to_string()])
                    .unwrap_or_default(),
            };
            json!({
                "interface": item["InterfaceAlias"],
                "ip_address": ip,
                "netmask": Value::Null,
                "is_apipa": ip.as_deref().map(is_apipa).unwrap_or(false),
                "gateway": gateway,
                "dns_servers": dns,
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
en0: flags=8863<UP,BROADCAST,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\tinet 192.168.1.50 netmask 0xffffff00 broadcast 192.168.1.255
en1: flags=8863<UP,BROADCAST,RUNNING,SIMPLEX,MULTICAST> mtu 1500
\tinet 169.254.12.34 netmask 0xffff0000";

    #[test]
    fn test_parse_addresses() {
        let interfaces = parse_ifconfig_addresses(IFCONFIG_OUTPUT);
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0]["interface"], "en0");
        assert_eq!(interfaces[0]["ip_address"], "192.168.1.50");
        assert_eq!(interfaces[0]["is_apipa"], false);
        assert_eq!(interfaces[1]["is_apipa"], true);
    }

    #[test]
    fn test_apipa_detection() {
        assert!(is_apipa("169.254.1.2"));
        assert!(!is_apipa("192.168.1.1"));
        assert!(!is_apipa("10.169.254.1"));
    }

    #[test]
    fn test_parse_dns_servers() {
        let output = "\
  nameserver[0] : 192.168.1.1
  nameserver[1] : 8.8.8.8
  nameserver[2] : 192.168.1.1";
        let servers = parse_dns_servers(output);
        assert_eq!(servers, vec!["192.168.1.1", "8.8.8.8"]);
    }

    #[test]
    fn test_summarize_apipa_suggestions() {
        let interfaces = parse_ifconfig_addresses(
            "en0: flags=8863<UP> mtu 1500\n\tinet 169.254.9.9 netmask 0xffff0000",
        );
        let result = GetIpConfig::summarize(Platform::Macos, interfaces, None, String::new());
        assert_eq!(result.data["has_valid_ip"], false);
        assert!(result.suggestions.iter().any(|s| s.contains("APIPA")));
    }

    #[test]
    fn test_parse_netipconfiguration() {
        let output = r#"{
            "InterfaceAlias": "Ethernet",
            "IPv4Address": {"IPAddress": "10.0.0.5"},
            "IPv4DefaultGateway": {"NextHop": "10.0.0.1"},
            "DNSServer": [{"ServerAddresses": "10.0.0.1"}]
        }"#;
        let interfaces = parse_netipconfiguration_json(output);
        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0]["ip_address"], "10.0.0.5");
        assert_eq!(interfaces[0]["gateway"], "10.0.0.1");
    }
}
