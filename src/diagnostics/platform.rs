//! Platform detection and cross-platform command execution
//!
//! Every diagnostic goes through [`CommandExecutor`]; above this layer the
//! rest of the crate only sees UTF-8 text and exit codes.

use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

#[cfg(unix)]
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supported operating systems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Macos,
    Windows,
    Linux,
    Unknown,
}

impl Platform {
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Platform::Macos
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Macos => "macos",
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Unknown => "unknown",
        }
    }

    pub fn is_unix(self) -> bool {
        matches!(self, Platform::Macos | Platform::Linux)
    }
}

/// Result of executing a system command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Combined output, preferring stdout
    #[allow(dead_code)] // Convenience for diagnostics that want one stream
    pub fn output(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }

    fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: -1,
            timed_out: false,
        }
    }
}

/// Executes OS commands with a wall-clock timeout.
///
/// Shell mode goes through `sh -c` on POSIX and a non-interactive PowerShell
/// on Windows. Spawn and IO failures never surface as `Err`: they are wrapped
/// into a non-zero exit code with the error text as stderr, so diagnostics
/// can always turn the outcome into a `DiagnosticResult`.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    default_timeout: Duration,
    platform: Platform,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl CommandExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            platform: Platform::detect(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Run a shell command string.
    pub async fn run_shell(&self, command: &str, timeout_override: Option<Duration>) -> CommandOutput {
        let mut cmd = if self.platform == Platform::Windows {
            let mut c = Command::new("powershell");
            c.args(["-NoProfile", "-NonInteractive", "-Command", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        self.run_command(&mut cmd, timeout_override).await
    }

    /// Run an argv command directly (no shell interpretation).
    pub async fn run_argv(&self, argv: &[&str], timeout_override: Option<Duration>) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::failed("empty command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        self.run_command(&mut cmd, timeout_override).await
    }

    async fn run_command(
        &self,
        cmd: &mut Command,
        timeout_override: Option<Duration>,
    ) -> CommandOutput {
        let timeout_duration = timeout_override.unwrap_or(self.default_timeout);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // New process group so a timeout kill takes descendants with it
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .ok();
                Ok(())
            });
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return CommandOutput::failed(format!("Failed to spawn process: {e}")),
        };

        let pid = child.id();
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let collect = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            if let Some(out) = stdout_pipe.as_mut() {
                let _ = out.read_to_end(&mut stdout_buf).await;
            }
            if let Some(err) = stderr_pipe.as_mut() {
                let _ = err.read_to_end(&mut stderr_buf).await;
            }
            let status = child.wait().await;
            (stdout_buf, stderr_buf, status)
        };

        match timeout(timeout_duration, collect).await {
            Ok((stdout_buf, stderr_buf, status)) => {
                let exit_code = match status {
                    Ok(s) => s.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                CommandOutput {
                    stdout: decode_output(&stdout_buf),
                    stderr: decode_output(&stderr_buf),
                    exit_code,
                    timed_out: false,
                }
            }
            Err(_) => {
                // Timeout: kill the process group and reap the child
                if let Some(pid) = pid {
                    #[cfg(unix)]
                    {
                        use nix::sys::signal::{killpg, Signal};
                        use nix::unistd::Pid;
                        let _ = killpg(Pid::from_raw(pid.cast_signed()), Signal::SIGKILL);
                    }
                    #[cfg(not(unix))]
                    {
                        let _ = pid;
                    }
                }

                CommandOutput {
                    stdout: String::new(),
                    stderr: format!("Command timed out after {} seconds", timeout_duration.as_secs()),
                    exit_code: -1,
                    timed_out: true,
                }
            }
        }
    }
}

/// Decode subprocess output with replacement on invalid sequences. Windows
/// console tools emit the OEM codepage; lossy decoding keeps the text usable
/// rather than failing the whole diagnostic.
fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_echo() {
        let executor = CommandExecutor::default();
        let result = executor.run_shell("echo hello", None).await;
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_argv_echo() {
        let executor = CommandExecutor::default();
        let result = executor.run_argv(&["echo", "hello", "world"], None).await;
        assert!(result.success());
        assert_eq!(result.stdout, "hello world");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let executor = CommandExecutor::default();
        let result = executor.run_shell("exit 3", None).await;
        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_spawn_failure_wrapped() {
        let executor = CommandExecutor::default();
        let result = executor
            .run_argv(&["/definitely/not/a/real/binary"], None)
            .await;
        assert!(!result.success());
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let executor = CommandExecutor::default();
        let result = executor
            .run_shell("sleep 30", Some(Duration::from_millis(200)))
            .await;
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let executor = CommandExecutor::default();
        let result = executor.run_shell("echo oops 1>&2", None).await;
        assert_eq!(result.stderr, "oops");
        assert_eq!(result.output(), "oops");
    }

    #[test]
    fn test_empty_command() {
        let output = CommandOutput::failed("empty command");
        assert!(!output.success());
    }
}
