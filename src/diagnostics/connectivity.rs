//! Connectivity diagnostics: ping the gateway and external DNS servers

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Well-known DNS servers probed by `ping_dns`
const DNS_SERVERS: &[(&str, &str)] = &[
    ("8.8.8.8", "Google Public DNS"),
    ("1.1.1.1", "Cloudflare DNS"),
];

const PING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct PingGatewayInput {
    gateway: Option<String>,
    count: Option<u32>,
}

/// Test connectivity to the default gateway
pub struct PingGateway {
    executor: CommandExecutor,
}

impl PingGateway {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    /// Auto-detect the default gateway from the routing table.
    async fn detect_gateway(&self) -> Option<String> {
        let cmd = match self.executor.platform() {
            Platform::Windows => {
                "(Get-NetRoute -DestinationPrefix '0.0.0.0/0' | Select-Object -First 1).NextHop"
            }
            Platform::Macos => "route -n get default 2>/dev/null | grep gateway | awk '{print $2}'",
            _ => "ip route show default 2>/dev/null | awk '/default/ {print $3; exit}'",
        };

        let result = self.executor.run_shell(cmd, None).await;
        if result.success() && !result.stdout.is_empty() {
            return Some(result.stdout.lines().next().unwrap_or("").trim().to_string());
        }

        // Fallback for unix systems without `ip`
        if self.executor.platform().is_unix() {
            let result = self
                .executor
                .run_shell("netstat -nr | grep default | head -1 | awk '{print $2}'", None)
                .await;
            if result.success() && !result.stdout.is_empty() {
                return Some(result.stdout.trim().to_string());
            }
        }

        None
    }
}

#[async_trait]
impl Diagnostic for PingGateway {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "ping_gateway".to_string(),
            display_name: "Ping Gateway".to_string(),
            description: "Test connectivity to the default gateway (router) using ICMP ping. \
                          Verifies the local network path is working."
                .to_string(),
            category: ToolCategory::Connectivity,
            osi_layer: 3,
            parameters: vec![
                ToolParameter::optional(
                    "gateway",
                    ParamType::String,
                    "Gateway IP to ping. If not provided, auto-detects from the routing table.",
                ),
                ToolParameter::optional(
                    "count",
                    ParamType::Number,
                    "Number of ping packets to send (default: 4)",
                )
                .with_default(json!(4)),
            ],
        }
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();
        let input: PingGatewayInput = match serde_json::from_value(args) {
            Ok(i) => i,
            Err(e) => {
                return DiagnosticResult::failure("ping_gateway", platform, format!("Invalid arguments: {e}"))
            }
        };
        let count = input.count.unwrap_or(4).clamp(1, 20);

        let gateway = match input.gateway {
            Some(g) if !g.is_empty() => g,
            _ => match self.detect_gateway().await {
                Some(g) => g,
                None => {
                    return DiagnosticResult::failure(
                        "ping_gateway",
                        platform,
                        "Could not determine default gateway",
                    )
                    .with_suggestions([
                        "Run get_ip_config to check network configuration",
                        "Verify network cable or WiFi connection",
                    ]);
                }
            },
        };

        let cmd = ping_command(platform, &gateway, count);
        let output = self.executor.run_shell(&cmd, Some(PING_TIMEOUT)).await;

        let mut data = parse_ping_output(&output.stdout);
        let stats = PingStats::from_data(&data);
        data.insert("gateway_ip".to_string(), json!(gateway));

        let mut suggestions: Vec<String> = Vec::new();
        if !stats.reachable {
            suggestions.extend(
                [
                    "Gateway is not responding".to_string(),
                    "Check if router/modem is powered on".to_string(),
                    "Verify Ethernet cable is connected or WiFi is associated".to_string(),
                    "Try restarting the router".to_string(),
                    format!("Check if gateway IP is correct: {gateway}"),
                ],
            );
        } else if stats.packet_loss_percent > 0.0 {
            suggestions.extend([
                format!(
                    "Intermittent connectivity ({:.0}% packet loss)",
                    stats.packet_loss_percent
                ),
                "Check WiFi signal strength if on wireless".to_string(),
                "Try a different Ethernet cable if wired".to_string(),
            ]);
        }

        DiagnosticResult::success("ping_gateway", platform, data)
            .with_raw_output(output.stdout)
            .with_suggestions(suggestions)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PingDnsInput {
    count: Option<u32>,
}

/// Test connectivity to external DNS servers
pub struct PingDns {
    executor: CommandExecutor,
}

impl PingDns {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Diagnostic for PingDns {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "ping_dns".to_string(),
            display_name: "Ping DNS Servers".to_string(),
            description: "Test connectivity to external DNS servers (8.8.8.8, 1.1.1.1) using \
                          ICMP ping. Verifies internet/WAN connectivity independent of DNS \
                          resolution."
                .to_string(),
            category: ToolCategory::Connectivity,
            osi_layer: 3,
            parameters: vec![ToolParameter::optional(
                "count",
                ParamType::Number,
                "Number of ping packets per server (default: 4)",
            )
            .with_default(json!(4))],
        }
    }

    async fn run(&self, args: Value, cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();
        let input: PingDnsInput = serde_json::from_value(args).unwrap_or_default();
        let count = input.count.unwrap_or(4).clamp(1, 20);

        let mut results = Vec::new();
        let mut best_server: Option<&str> = None;
        let mut best_latency = f64::INFINITY;

        for (ip, name) in DNS_SERVERS {
            if cancel.is_cancelled() {
                break;
            }

            let cmd = ping_command(platform, ip, count);
            let output = self.executor.run_shell(&cmd, Some(PING_TIMEOUT)).await;
            let data = parse_ping_output(&output.stdout);
            let stats = PingStats::from_data(&data);

            if stats.reachable {
                if let Some(avg) = stats.avg_time_ms {
                    if avg < best_latency {
                        best_latency = avg;
                        best_server = Some(ip);
                    }
                }
            }

            results.push(json!({
                "server": ip,
                "name": name,
                "reachable": stats.reachable,
                "packets_sent": data.get("packets_sent"),
                "packets_received": data.get("packets_received"),
                "packet_loss_percent": data.get("packet_loss_percent"),
                "avg_time_ms": data.get("avg_time_ms"),
            }));
        }

        let servers_reachable = results
            .iter()
            .filter(|r| r["reachable"].as_bool() == Some(true))
            .count();
        let internet_accessible = servers_reachable > 0;

        let mut suggestions: Vec<String> = Vec::new();
        if !internet_accessible {
            suggestions.extend([
                "Cannot reach external DNS servers - no internet connectivity".to_string(),
                "If gateway ping succeeded, this is a WAN issue".to_string(),
                "Check if modem is connected to ISP".to_string(),
                "Contact ISP if modem shows connected but no internet".to_string(),
            ]);
        } else if servers_reachable < DNS_SERVERS.len() {
            suggestions
                .push("Internet is accessible but some DNS servers are unreachable".to_string());
            if let Some(server) = best_server {
                suggestions.push(format!("Consider using the reachable DNS server ({server})"));
            }
        }

        let mut data = Map::new();
        data.insert("servers_tested".to_string(), json!(DNS_SERVERS.len()));
        data.insert("servers_reachable".to_string(), json!(servers_reachable));
        data.insert("internet_accessible".to_string(), json!(internet_accessible));
        data.insert("results".to_string(), json!(results));
        data.insert("best_server".to_string(), json!(best_server));
        data.insert(
            "best_latency_ms".to_string(),
            if best_latency.is_finite() {
                json!(best_latency)
            } else {
                Value::Null
            },
        );

        DiagnosticResult::success("ping_dns", platform, data).with_suggestions(suggestions)
    }
}

fn ping_command(platform: Platform, target: &str, count: u32) -> String {
    if platform == Platform::Windows {
        format!("ping -n {count} -w 5000 {target}")
    } else {
        format!("ping -c {count} -W 5 {target}")
    }
}

struct PingStats {
    reachable: bool,
    packet_loss_percent: f64,
    avg_time_ms: Option<f64>,
}

impl PingStats {
    fn from_data(data: &Map<String, Value>) -> Self {
        Self {
            reachable: data.get("reachable").and_then(Value::as_bool).unwrap_or(false),
            packet_loss_percent: data
                .get("packet_loss_percent")
                .and_then(Value::as_f64)
                .unwrap_or(100.0),
            avg_time_ms: data.get("avg_time_ms").and_then(Value::as_f64),
        }
    }
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)time[=<](\d+\.?\d*)\s*ms").unwrap())
}

fn ttl_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)ttl[=:](\d+)").unwrap())
}

fn stats_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+\.?\d*)/(\d+\.?\d*)/(\d+\.?\d*)").unwrap())
}

/// Parse ping output into structured data.
///
/// Understands the macOS/Linux summary (`4 packets transmitted, 4 received`,
/// `min/avg/max/stddev = ...`) and the Windows one (`Packets: Sent = 4,
/// Received = 4`, `Minimum = 0ms, Maximum = 1ms, Average = 0ms`).
pub(crate) fn parse_ping_output(output: &str) -> Map<String, Value> {
    let mut replies: Vec<Value> = Vec::new();
    let mut packets_sent: u64 = 0;
    let mut packets_received: u64 = 0;
    let mut min_time: Option<f64> = None;
    let mut avg_time: Option<f64> = None;
    let mut max_time: Option<f64> = None;

    let unix_sent_re = Regex::new(r"(?i)(\d+)\s+packets transmitted").unwrap();
    let win_sent_re = Regex::new(r"(?i)sent\s*=\s*(\d+)").unwrap();
    let unix_recv_re = Regex::new(r"(?i)(\d+)\s+(?:packets\s+)?received").unwrap();
    let win_recv_re = Regex::new(r"(?i)received\s*=\s*(\d+)").unwrap();

    for line in output.lines() {
        let lower = line.to_lowercase();

        if lower.contains("bytes from") || lower.contains("reply from") {
            let time_ms = time_re()
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok());
            let ttl = ttl_re()
                .captures(line)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok());
            replies.push(json!({
                "sequence": replies.len(),
                "success": true,
                "time_ms": time_ms,
                "ttl": ttl,
            }));
        } else if lower.contains("request timeout") || lower.contains("request timed out") {
            replies.push(json!({
                "sequence": replies.len(),
                "success": false,
                "time_ms": Value::Null,
                "ttl": Value::Null,
            }));
        } else if lower.contains("packets transmitted") || lower.contains("packets: sent") {
            if let Some(c) = unix_sent_re.captures(line).or_else(|| win_sent_re.captures(line)) {
                packets_sent = c[1].parse().unwrap_or(0);
            }
            // Windows puts Sent and Received on the same line
            if let Some(c) = win_recv_re.captures(line).or_else(|| unix_recv_re.captures(line)) {
                packets_received = c[1].parse().unwrap_or(0);
            }
        } else if lower.contains("min/avg/max") {
            if let Some(c) = stats_re().captures(line) {
                min_time = c[1].parse().ok();
                avg_time = c[2].parse().ok();
                max_time = c[3].parse().ok();
            }
        } else if lower.contains("minimum") {
            let grab = |name: &str| {
                Regex::new(&format!(r"(?i){name}\s*=\s*(\d+)"))
                    .unwrap()
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().parse::<f64>().ok())
            };
            min_time = grab("minimum");
            max_time = grab("maximum");
            avg_time = grab("average");
        }
    }

    // No summary line parsed: fall back to counting reply lines
    if packets_sent == 0 {
        packets_sent = if replies.is_empty() { 4 } else { replies.len() as u64 };
        packets_received = replies
            .iter()
            .filter(|r| r["success"].as_bool() == Some(true))
            .count() as u64;
    }

    let packet_loss = if packets_sent > 0 {
        #[allow(clippy::cast_precision_loss)]
        {
            (packets_sent.saturating_sub(packets_received)) as f64 / packets_sent as f64 * 100.0
        }
    } else {
        100.0
    };

    let mut data = Map::new();
    data.insert("reachable".to_string(), json!(packets_received > 0));
    data.insert("packets_sent".to_string(), json!(packets_sent));
    data.insert("packets_received".to_string(), json!(packets_received));
    data.insert("packet_loss_percent".to_string(), json!(packet_loss));
    data.insert("min_time_ms".to_string(), json!(min_time));
    data.insert("avg_time_ms".to_string(), json!(avg_time));
    data.insert("max_time_ms".to_string(), json!(max_time));
    data.insert("results".to_string(), json!(replies));
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_PING: &str = "\
PING 192.168.1.1 (192.168.1.1) 56(84) bytes of data.
64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=1.23 ms
64 bytes from 192.168.1.1: icmp_seq=2 ttl=64 time=1.45 ms
64 bytes from 192.168.1.1: icmp_seq=3 ttl=64 time=1.10 ms
64 bytes from 192.168.1.1: icmp_seq=4 ttl=64 time=1.80 ms

--- 192.168.1.1 ping statistics ---
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 1.100/1.395/1.800/0.262 ms";

    const MACOS_PING_LOSS: &str = "\
PING 10.0.0.1 (10.0.0.1): 56 data bytes
64 bytes from 10.0.0.1: icmp_seq=0 ttl=64 time=2.1 ms
Request timeout for icmp_seq 1
64 bytes from 10.0.0.1: icmp_seq=2 ttl=64 time=2.3 ms
Request timeout for icmp_seq 3

--- 10.0.0.1 ping statistics ---
4 packets transmitted, 2 packets received, 50.0% packet loss
round-trip min/avg/max/stddev = 2.100/2.200/2.300/0.100 ms";

    const WINDOWS_PING: &str = "\
Pinging 192.168.0.1 with 32 bytes of data:
Reply from 192.168.0.1: bytes=32 time=1ms TTL=64
Reply from 192.168.0.1: bytes=32 time=2ms TTL=64
Reply from 192.168.0.1: bytes=32 time=1ms TTL=64
Reply from 192.168.0.1: bytes=32 time=1ms TTL=64

Ping statistics for 192.168.0.1:
    Packets: Sent = 4, Received = 4, Lost = 0 (0% loss),
Approximate round trip times in milli-seconds:
    Minimum = 1ms, Maximum = 2ms, Average = 1ms";

    const UNREACHABLE_PING: &str = "\
PING 192.168.9.9 (192.168.9.9): 56 data bytes
Request timeout for icmp_seq 0
Request timeout for icmp_seq 1
Request timeout for icmp_seq 2
Request timeout for icmp_seq 3

--- 192.168.9.9 ping statistics ---
4 packets transmitted, 0 packets received, 100.0% packet loss";

    #[test]
    fn test_parse_linux_ping() {
        let data = parse_ping_output(LINUX_PING);
        assert_eq!(data["reachable"], json!(true));
        assert_eq!(data["packets_sent"], json!(4));
        assert_eq!(data["packets_received"], json!(4));
        assert_eq!(data["packet_loss_percent"], json!(0.0));
        assert_eq!(data["avg_time_ms"], json!(1.395));
        assert_eq!(data["results"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_parse_macos_partial_loss() {
        let data = parse_ping_output(MACOS_PING_LOSS);
        assert_eq!(data["reachable"], json!(true));
        assert_eq!(data["packets_sent"], json!(4));
        assert_eq!(data["packets_received"], json!(2));
        assert_eq!(data["packet_loss_percent"], json!(50.0));
    }

    #[test]
    fn test_parse_windows_ping() {
        let data = parse_ping_output(WINDOWS_PING);
        assert_eq!(data["reachable"], json!(true));
        assert_eq!(data["packets_sent"], json!(4));
        assert_eq!(data["packets_received"], json!(4));
        assert_eq!(data["avg_time_ms"], json!(1.0));
        assert_eq!(data["min_time_ms"], json!(1.0));
        assert_eq!(data["max_time_ms"], json!(2.0));
    }

    #[test]
    fn test_parse_unreachable() {
        let data = parse_ping_output(UNREACHABLE_PING);
        assert_eq!(data["reachable"], json!(false));
        assert_eq!(data["packet_loss_percent"], json!(100.0));
    }

    #[test]
    fn test_parse_empty_output() {
        let data = parse_ping_output("");
        assert_eq!(data["reachable"], json!(false));
        assert_eq!(data["packets_sent"], json!(4));
        assert_eq!(data["packets_received"], json!(0));
    }

    proptest::proptest! {
        // The parser sees whatever the OS ping emits; it must never panic
        // and must always produce the full set of keys.
        #[test]
        fn test_parse_never_panics(output in ".{0,512}") {
            let data = parse_ping_output(&output);
            prop_assert_key(&data, "reachable");
            prop_assert_key(&data, "packet_loss_percent");
        }
    }

    fn prop_assert_key(data: &Map<String, Value>, key: &str) {
        assert!(data.contains_key(key));
    }

    #[test]
    fn test_ping_command_per_platform() {
        assert_eq!(
            ping_command(Platform::Linux, "1.1.1.1", 4),
            "ping -c 4 -W 5 1.1.1.1"
        );
        assert_eq!(
            ping_command(Platform::Windows, "1.1.1.1", 4),
            "ping -n 4 -w 5000 1.1.1.1"
        );
    }
}
