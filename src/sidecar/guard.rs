//! PID-file guard for orphaned sidecar processes
//!
//! A crash can leave the supervised process running. The PID of an owned
//! process is written to a file; the next startup terminates a still-alive
//! prior PID before spawning anything.

use std::path::PathBuf;

pub struct PidGuard {
    pid_file: PathBuf,
}

impl PidGuard {
    pub fn new(pid_file: PathBuf) -> Self {
        Self { pid_file }
    }

    /// Check for an orphaned process from a previous run and clean it up.
    /// Returns true when a live orphan was found and terminated.
    pub fn check_and_cleanup(&self) -> bool {
        let Ok(contents) = std::fs::read_to_string(&self.pid_file) else {
            return false;
        };

        let Ok(pid) = contents.trim().parse::<i32>() else {
            tracing::warn!("Invalid PID file, cleaning up");
            self.remove_file();
            return false;
        };

        if is_process_running(pid) {
            tracing::warn!(pid, "Found orphaned sidecar process");
            if terminate_process(pid) {
                tracing::info!(pid, "Terminated orphaned sidecar process");
                self.remove_file();
                return true;
            }
            tracing::error!(pid, "Failed to terminate orphaned process");
        } else {
            tracing::debug!("Stale PID file found, cleaning up");
            self.remove_file();
        }

        false
    }

    /// Record the PID of a process we own
    pub fn register(&self, pid: u32) {
        if let Some(parent) = self.pid_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.pid_file, pid.to_string()) {
            tracing::warn!(error = %e, "Failed to write PID file");
        }
    }

    /// Remove the PID file (clean shutdown)
    pub fn unregister(&self) {
        self.remove_file();
    }

    fn remove_file(&self) {
        if self.pid_file.exists() {
            if let Err(e) = std::fs::remove_file(&self.pid_file) {
                tracing::warn!(error = %e, "Failed to remove PID file");
            }
        }
    }
}

#[cfg(unix)]
fn is_process_running(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_running(pid: i32) -> bool {
    let output = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output();
    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()),
        Err(_) => false,
    }
}

/// SIGTERM, then SIGKILL after a grace period on POSIX; `taskkill` on Windows.
#[cfg(unix)]
fn terminate_process(pid: i32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid);
    if kill(target, Signal::SIGTERM).is_err() {
        // Already gone
        return true;
    }

    for _ in 0..10 {
        std::thread::sleep(std::time::Duration::from_millis(500));
        if !is_process_running(pid) {
            return true;
        }
    }

    let _ = kill(target, Signal::SIGKILL);
    true
}

#[cfg(not(unix))]
fn terminate_process(pid: i32) -> bool {
    std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let guard = PidGuard::new(dir.path().join(".ollama.pid"));
        assert!(!guard.check_and_cleanup());
    }

    #[test]
    fn test_stale_pid_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(".ollama.pid");
        // A PID far above any real process table entry
        std::fs::write(&pid_file, "999999999").unwrap();

        let guard = PidGuard::new(pid_file.clone());
        assert!(!guard.check_and_cleanup());
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_invalid_pid_file_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(".ollama.pid");
        std::fs::write(&pid_file, "not-a-pid").unwrap();

        let guard = PidGuard::new(pid_file.clone());
        assert!(!guard.check_and_cleanup());
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_register_and_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(".ollama.pid");

        let guard = PidGuard::new(pid_file.clone());
        guard.register(12345);
        assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), "12345");

        guard.unregister();
        assert!(!pid_file.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_orphan_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(".ollama.pid");

        // A real child that would otherwise linger
        let child = std::process::Command::new("sleep").arg("60").spawn().unwrap();
        std::fs::write(&pid_file, child.id().to_string()).unwrap();

        let guard = PidGuard::new(pid_file.clone());
        assert!(guard.check_and_cleanup());
        assert!(!pid_file.exists());
    }
}
