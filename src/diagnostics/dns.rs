//! DNS resolution diagnostic

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_HOSTS: &[&str] = &["google.com", "cloudflare.com"];

#[derive(Debug, Default, Deserialize)]
struct DnsInput {
    hostnames: Option<Vec<String>>,
    dns_server: Option<String>,
}

/// Test DNS name resolution via nslookup
pub struct TestDnsResolution {
    executor: CommandExecutor,
}

impl TestDnsResolution {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Diagnostic for TestDnsResolution {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "test_dns_resolution".to_string(),
            display_name: "Test DNS Resolution".to_string(),
            description: "Test DNS name resolution by resolving common hostnames. Verifies the \
                          system can translate domain names to IP addresses."
                .to_string(),
            category: ToolCategory::Dns,
            osi_layer: 7,
            parameters: vec![
                ToolParameter::optional(
                    "hostnames",
                    ParamType::Array,
                    "Hostnames to resolve. Default: ['google.com', 'cloudflare.com']",
                ),
                ToolParameter::optional(
                    "dns_server",
                    ParamType::String,
                    "Specific DNS server to use. If not provided, uses system default.",
                ),
            ],
        }
    }

    async fn run(&self, args: Value, cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();
        let input: DnsInput = serde_json::from_value(args).unwrap_or_default();
        let hosts = input
            .hostnames
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_HOSTS.iter().map(ToString::to_string).collect());

        let mut results = Vec::new();
        let mut resolved_count = 0usize;
        let mut total_time = 0.0f64;
        let mut dns_used: Option<String> = input.dns_server.clone();

        for hostname in &hosts {
            if cancel.is_cancelled() {
                break;
            }

            let cmd = match &input.dns_server {
                Some(server) => format!("nslookup {hostname} {server}"),
                None => format!("nslookup {hostname}"),
            };

            let start = Instant::now();
            let output = self.executor.run_shell(&cmd, None).await;
            #[allow(clippy::cast_precision_loss)]
            let elapsed_ms = start.elapsed().as_millis() as f64;

            let mut result = parse_nslookup(hostname, &output.stdout, &output.stderr);
            let resolved = result["resolved"].as_bool() == Some(true);
            result["resolution_time_ms"] = if resolved { json!(elapsed_ms) } else { Value::Null };

            if resolved {
                resolved_count += 1;
                total_time += elapsed_ms;
            }
            if dns_used.is_none() {
                dns_used = result["dns_server_used"].as_str().map(str::to_string);
            }
            results.push(result);
        }

        let dns_working = resolved_count > 0;
        #[allow(clippy::cast_precision_loss)]
        let avg_time = if resolved_count > 0 {
            Some(total_time / resolved_count as f64)
        } else {
            None
        };

        let mut suggestions: Vec<String> = Vec::new();
        if !dns_working {
            suggestions.extend([
                "DNS resolution is not working".to_string(),
                "If ping_dns succeeded, this is a DNS-specific issue".to_string(),
                "Try changing DNS server to 8.8.8.8 or 1.1.1.1".to_string(),
            ]);
            if platform == Platform::Macos {
                suggestions
                    .push("On macOS: System Preferences > Network > Advanced > DNS".to_string());
            } else {
                suggestions.push(
                    "Set the DNS server in the network adapter's IPv4 settings".to_string(),
                );
            }
        } else if resolved_count < hosts.len() {
            let failed: Vec<&str> = results
                .iter()
                .filter(|r| r["resolved"].as_bool() != Some(true))
                .filter_map(|r| r["hostname"].as_str())
                .collect();
            suggestions.push(format!(
                "DNS works but some domains failed: {}",
                failed.join(", ")
            ));
            suggestions.push("These domains may not exist or may be blocked".to_string());
        }

        let mut data = Map::new();
        data.insert("hosts_tested".to_string(), json!(hosts.len()));
        data.insert("hosts_resolved".to_string(), json!(resolved_count));
        data.insert("dns_working".to_string(), json!(dns_working));
        data.insert("results".to_string(), json!(results));
        data.insert("avg_resolution_time_ms".to_string(), json!(avg_time));
        data.insert("dns_server".to_string(), json!(dns_used));

        DiagnosticResult::success("test_dns_resolution", platform, data)
            .with_suggestions(suggestions)
    }
}

/// Parse nslookup output into a per-hostname record.
pub(crate) fn parse_nslookup(hostname: &str, stdout: &str, stderr: &str) -> Value {
    let output = format!("{stdout}\n{stderr}");
    let lower = output.to_lowercase();

    let mut result = json!({
        "hostname": hostname,
        "resolved": false,
        "ip_addresses": [],
        "dns_server_used": Value::Null,
        "record_type": Value::Null,
        "error": Value::Null,
    });

    if lower.contains("server can't find") || lower.contains("nxdomain") {
        result["error"] = json!("NXDOMAIN - domain not found");
        return result;
    }
    if lower.contains("timed out") || lower.contains("no response") {
        result["error"] = json!("DNS request timed out");
        return result;
    }

    let server_re = Regex::new(r"Server:\s*(\S+)").unwrap();
    let addr_re = Regex::new(r"Address(?:es)?:\s*(\d+\.\d+\.\d+\.\d+)").unwrap();

    let server = server_re
        .captures(&output)
        .map(|c| c[1].to_string());
    result["dns_server_used"] = json!(server);

    let mut addresses = Vec::new();
    let mut in_answer = false;
    for line in output.lines() {
        let line_lower = line.to_lowercase();
        if line_lower.contains("non-authoritative answer") || line_lower.contains("name:") {
            in_answer = true;
            continue;
        }
        if in_answer {
            if let Some(c) = addr_re.captures(line) {
                let ip = c[1].to_string();
                if Some(ip.as_str()) != server.as_deref() {
                    addresses.push(ip);
                }
            }
        }
    }

    if !addresses.is_empty() {
        result["resolved"] = json!(true);
        result["record_type"] = json!("A");
        result["ip_addresses"] = json!(addresses);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const NSLOOKUP_OK: &str = "\
Server:\t\t192.168.1.1
Address:\t192.168.1.1#53

Non-authoritative answer:
Name:\tgoogle.com
Address: 142.250.80.46";

    const NSLOOKUP_NXDOMAIN: &str = "\
Server:\t\t192.168.1.1
Address:\t192.168.1.1#53

** server can't find doesnotexist.example: NXDOMAIN";

    #[test]
    fn test_parse_successful_lookup() {
        let result = parse_nslookup("google.com", NSLOOKUP_OK, "");
        assert_eq!(result["resolved"], true);
        assert_eq!(result["ip_addresses"][0], "142.250.80.46");
        assert_eq!(result["record_type"], "A");
        assert_eq!(result["dns_server_used"], "192.168.1.1");
    }

    #[test]
    fn test_parse_nxdomain() {
        let result = parse_nslookup("doesnotexist.example", NSLOOKUP_NXDOMAIN, "");
        assert_eq!(result["resolved"], false);
        assert_eq!(result["error"], "NXDOMAIN - domain not found");
    }

    #[test]
    fn test_parse_timeout() {
        let result = parse_nslookup("google.com", "", ";; connection timed out; no servers could be reached");
        assert_eq!(result["resolved"], false);
        assert_eq!(result["error"], "DNS request timed out");
    }

    #[test]
    fn test_dns_server_address_not_counted() {
        // The server's own address before the answer section must not count
        // as a resolution.
        let output = "Server:\t192.168.1.1\nAddress:\t192.168.1.1#53\n";
        let result = parse_nslookup("google.com", output, "");
        assert_eq!(result["resolved"], false);
    }
}
