//! Process management diagnostic
//!
//! Terminates problematic processes. Critical system processes are on a
//! per-platform deny list and are refused before any OS call is made.

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

/// Processes that must never be killed
pub(crate) const PROTECTED_MACOS: &[&str] = &[
    "kernel_task",
    "launchd",
    "WindowServer",
    "loginwindow",
    "opendirectoryd",
    "securityd",
    "diskarbitrationd",
    "configd",
    "mds",
    "mds_stores",
    "notifyd",
    "UserEventAgent",
];

pub(crate) const PROTECTED_WINDOWS: &[&str] = &[
    "System",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "svchost.exe",
    "winlogon.exe",
    "dwm.exe",
    "RuntimeBroker.exe",
    "fontdrvhost.exe",
];

pub(crate) const PROTECTED_LINUX: &[&str] = &[
    "init",
    "systemd",
    "kthreadd",
    "dbus-daemon",
    "NetworkManager",
    "gdm",
    "sddm",
    "lightdm",
    "Xorg",
    "gnome-shell",
    "plasmashell",
    "journald",
];

pub(crate) fn protected_names(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Macos => PROTECTED_MACOS,
        Platform::Windows => PROTECTED_WINDOWS,
        Platform::Linux => PROTECTED_LINUX,
        Platform::Unknown => &[],
    }
}

/// Check a process name against the platform deny list.
pub(crate) fn is_protected(platform: Platform, name: &str) -> bool {
    let lower = name.to_lowercase();
    protected_names(platform).iter().any(|prot| {
        let prot_lower = prot.to_lowercase();
        lower == prot_lower || lower.contains(&prot_lower) || prot_lower.contains(&lower)
    })
}

#[derive(Debug, Default, Deserialize)]
struct KillInput {
    process_name: Option<String>,
    process_id: Option<i64>,
    #[serde(default)]
    force: bool,
}

/// Terminate hung or problematic processes
pub struct KillProcess {
    executor: CommandExecutor,
}

impl KillProcess {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    /// Find processes matching a name or PID. Returns `(pid, name)` pairs.
    async fn find_processes(
        &self,
        name: Option<&str>,
        pid: Option<i64>,
    ) -> Vec<(i64, String)> {
        let platform = self.executor.platform();

        let cmd = match (platform, name, pid) {
            (Platform::Windows, Some(name), _) => format!(
                "Get-Process -Name \"{name}\" -ErrorAction SilentlyContinue | \
                 ForEach-Object {{ \"$($_.Id) $($_.ProcessName)\" }}"
            ),
            (Platform::Windows, None, Some(pid)) => format!(
                "Get-Process -Id {pid} -ErrorAction SilentlyContinue | \
                 ForEach-Object {{ \"$($_.Id) $($_.ProcessName)\" }}"
            ),
            (_, Some(name), _) => format!("pgrep -il \"{name}\" 2>/dev/null || pgrep -l \"{name}\""),
            (_, None, Some(pid)) => format!("ps -p {pid} -o pid=,comm="),
            _ => return Vec::new(),
        };

        let output = self.executor.run_shell(&cmd, None).await;
        parse_process_list(&output.stdout)
    }

    async fn kill(&self, pid: i64, force: bool) -> bool {
        let platform = self.executor.platform();
        let cmd = match platform {
            Platform::Windows => {
                if force {
                    format!("taskkill /PID {pid} /T /F")
                } else {
                    format!("taskkill /PID {pid} /T")
                }
            }
            _ => {
                let signal = if force { "-9" } else { "-15" };
                format!("kill {signal} {pid}")
            }
        };
        self.executor.run_shell(&cmd, None).await.success()
    }
}

#[async_trait]
impl Diagnostic for KillProcess {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "kill_process".to_string(),
            display_name: "Kill Process".to_string(),
            description: "Terminate hung or problematic processes by name or PID. Critical \
                          system processes are protected and will not be killed."
                .to_string(),
            category: ToolCategory::System,
            osi_layer: 7,
            parameters: vec![
                ToolParameter::optional(
                    "process_name",
                    ParamType::String,
                    "Name of the process to kill (e.g., 'chrome', 'Teams')",
                ),
                ToolParameter::optional(
                    "process_id",
                    ParamType::Number,
                    "Specific PID to terminate",
                ),
                ToolParameter::optional(
                    "force",
                    ParamType::Boolean,
                    "Use forceful termination (SIGKILL on Unix, /F on Windows)",
                )
                .with_default(json!(false)),
            ],
        }
    }

    async fn run(&self, args: Value, _cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();
        let input: KillInput = match serde_json::from_value(args) {
            Ok(i) => i,
            Err(e) => {
                return DiagnosticResult::failure(
                    "kill_process",
                    platform,
                    format!("Invalid arguments: {e}"),
                )
            }
        };

        if input.process_name.is_none() && input.process_id.is_none() {
            return DiagnosticResult::failure(
                "kill_process",
                platform,
                "Must specify either process_name or process_id",
            )
            .with_suggestions([
                "Provide a process name like 'chrome' or 'Teams'",
                "Or provide a specific PID number",
            ]);
        }

        // Refuse protected targets before touching the process table
        if let Some(name) = &input.process_name {
            if is_protected(platform, name) {
                return DiagnosticResult::failure(
                    "kill_process",
                    platform,
                    format!("'{name}' is a protected system process"),
                )
                .with_suggestions([
                    "This process is critical for system operation",
                    "Killing it would likely crash or destabilize the system",
                    "If the system is unresponsive, consider a restart instead",
                ]);
            }
        }

        let processes = self
            .find_processes(input.process_name.as_deref(), input.process_id)
            .await;

        if processes.is_empty() {
            let mut data = Map::new();
            data.insert("search_name".to_string(), json!(input.process_name));
            data.insert("search_pid".to_string(), json!(input.process_id));
            return DiagnosticResult::failure("kill_process", platform, "No matching processes found")
                .with_data(data)
                .with_suggestions([
                    "Check the process name spelling",
                    "The process may have already terminated",
                ]);
        }

        let mut killed = Vec::new();
        let mut failed = Vec::new();
        let mut blocked = Vec::new();

        for (pid, name) in processes {
            if is_protected(platform, &name) {
                blocked.push(json!({"pid": pid, "name": name}));
                continue;
            }
            if self.kill(pid, input.force).await {
                killed.push(json!({"pid": pid, "name": name}));
            } else {
                failed.push(json!({"pid": pid, "name": name}));
            }
        }

        let mut data = Map::new();
        data.insert("killed".to_string(), json!(killed));
        data.insert("killed_count".to_string(), json!(killed.len()));
        data.insert("failed".to_string(), json!(failed));
        data.insert("failed_count".to_string(), json!(failed.len()));
        data.insert("protected_blocked".to_string(), json!(blocked));
        data.insert("protected_blocked_count".to_string(), json!(blocked.len()));
        data.insert("force_used".to_string(), json!(input.force));

        if !killed.is_empty() {
            let mut suggestions = vec!["Verify the application restarts cleanly".to_string()];
            if !blocked.is_empty() {
                suggestions.push(format!(
                    "{} protected system process(es) were left running",
                    blocked.len()
                ));
            }
            DiagnosticResult::success("kill_process", platform, data).with_suggestions(suggestions)
        } else if !blocked.is_empty() && failed.is_empty() {
            DiagnosticResult::failure(
                "kill_process",
                platform,
                "All matching processes are protected system processes",
            )
            .with_data(data)
            .with_suggestions([
                "These processes are critical for system operation",
                "Killing them would likely crash or destabilize the system",
                "If the system is unresponsive, consider a restart instead",
            ])
        } else {
            DiagnosticResult::failure("kill_process", platform, "Failed to terminate any processes")
                .with_data(data)
                .with_suggestions([
                    "Try running with force=true for forceful termination",
                    "You may need administrator/root privileges",
                ])
        }
    }
}


/// Parse `pgrep -l` / `ps` / PowerShell `"pid name"` lines.
pub(crate) fn parse_process_list(output: &str) -> Vec<(i64, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let pid = parts.next()?.parse::<i64>().ok()?;
            let name = parts.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                None
            } else {
                Some((pid, name))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_names_per_platform() {
        assert!(is_protected(Platform::Linux, "systemd"));
        assert!(is_protected(Platform::Macos, "kernel_task"));
        assert!(is_protected(Platform::Windows, "smss.exe"));
        assert!(!is_protected(Platform::Linux, "chrome"));
    }

    #[test]
    fn test_protected_matches_are_case_insensitive() {
        assert!(is_protected(Platform::Macos, "WINDOWSERVER"));
        assert!(is_protected(Platform::Windows, "SVCHOST.EXE"));
    }

    #[test]
    fn test_parse_process_list() {
        let output = "1234 chrome\n5678 chrome_helper\nnot-a-pid junk";
        let processes = parse_process_list(output);
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0], (1234, "chrome".to_string()));
        assert_eq!(processes[1], (5678, "chrome_helper".to_string()));
    }

    #[tokio::test]
    async fn test_protected_refusal_happens_before_lookup() {
        // The deny list is consulted before any process-table command runs:
        // a protected name is refused even though no such process exists.
        let tool = KillProcess::new(CommandExecutor::default());
        let result = tool
            .run(
                json!({"process_name": "systemd"}),
                CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("protected system process"));
    }

    #[tokio::test]
    async fn test_missing_target_rejected() {
        let tool = KillProcess::new(CommandExecutor::default());
        let result = tool.run(json!({}), CancellationToken::new()).await;
        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("process_name or process_id"));
    }
}
