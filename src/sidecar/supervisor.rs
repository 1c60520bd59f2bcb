//! Ollama process supervisor: locate, spawn, health-check, shut down

use super::guard::PidGuard;
use super::{SidecarError, SidecarResult};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);
const START_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// One downloaded model, as reported by `/api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub digest: String,
}

/// Progress of a streamed model pull
#[derive(Debug, Clone)]
pub struct PullProgress {
    pub status: String,
    pub completed: u64,
    pub total: u64,
}

struct SupervisorState {
    process: Option<Child>,
    started: bool,
    owns_process: bool,
}

/// Supervises the Ollama sidecar process lifecycle.
pub struct OllamaSupervisor {
    base_url: String,
    host: String,
    port: u16,
    models_dir: PathBuf,
    /// Bundled resources root (`<resources>/ollama/<platform>/<binary>`)
    resources_dir: Option<PathBuf>,
    bundled_mode: bool,
    http: reqwest::Client,
    guard: PidGuard,
    state: Mutex<SupervisorState>,
}

impl OllamaSupervisor {
    pub fn new(
        host: &str,
        port: u16,
        models_dir: PathBuf,
        resources_dir: Option<PathBuf>,
        bundled_mode: bool,
        pid_file: PathBuf,
    ) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            host: host.to_string(),
            port,
            models_dir,
            resources_dir,
            bundled_mode,
            http: reqwest::Client::new(),
            guard: PidGuard::new(pid_file),
            state: Mutex::new(SupervisorState {
                process: None,
                started: false,
                owns_process: false,
            }),
        }
    }

    /// Find the Ollama binary: bundled resources first, then PATH.
    pub fn locate_binary(&self) -> SidecarResult<PathBuf> {
        let mut searched = Vec::new();

        if let Some(resources) = &self.resources_dir {
            let bundled = resources
                .join("ollama")
                .join(platform_dir())
                .join(binary_name());
            if bundled.exists() {
                tracing::info!(path = %bundled.display(), "Using bundled Ollama");
                return Ok(bundled);
            }
            searched.push(bundled);
        }

        if let Ok(system) = which::which("ollama") {
            tracing::info!(path = %system.display(), "Using system Ollama");
            return Ok(system);
        }
        searched.push(PathBuf::from("PATH"));

        Err(SidecarError::NotFound { searched })
    }

    /// Health check: any 2xx from the list-models endpoint
    pub async fn is_healthy(&self) -> bool {
        let result = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        matches!(result, Ok(r) if r.status().is_success())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.started
    }

    /// Start the sidecar and wait until it answers health checks.
    ///
    /// An already-healthy instance is adopted without spawning. Before any
    /// spawn, an orphan from a prior crash is terminated via the PID guard.
    pub async fn start(&self) -> SidecarResult<()> {
        let mut state = self.state.lock().await;
        if state.started {
            tracing::debug!("Sidecar already started");
            return Ok(());
        }

        self.guard.check_and_cleanup();

        if self.is_healthy().await {
            tracing::info!("Ollama already running, adopting existing instance");
            state.started = true;
            state.owns_process = false;
            return Ok(());
        }

        let binary = self.locate_binary()?;
        tracing::info!(path = %binary.display(), "Starting Ollama");

        std::fs::create_dir_all(&self.models_dir)?;

        let mut cmd = Command::new(&binary);
        cmd.arg("serve")
            .env("OLLAMA_HOST", format!("{}:{}", self.host, self.port))
            .env("OLLAMA_MODELS", &self.models_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if self.bundled_mode {
            cmd.env("OLLAMA_NOPRUNE", "1");
        }

        // No console window on Windows
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(0x0800_0000);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SidecarError::Startup(format!("Failed to spawn Ollama: {e}")))?;

        let deadline = Instant::now() + START_TIMEOUT;
        loop {
            if self.is_healthy().await {
                tracing::info!("Ollama is ready");
                if let Some(pid) = child.id() {
                    self.guard.register(pid);
                }
                state.process = Some(child);
                state.started = true;
                state.owns_process = true;
                return Ok(());
            }

            if let Ok(Some(status)) = child.try_wait() {
                let mut stderr_output = String::new();
                if let Some(mut stderr) = child.stderr.take() {
                    let _ = stderr.read_to_string(&mut stderr_output).await;
                }
                return Err(SidecarError::Startup(format!(
                    "Ollama exited unexpectedly with {status}\nstderr: {stderr_output}"
                )));
            }

            if Instant::now() >= deadline {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(SidecarError::Startup(format!(
                    "Ollama failed to start within {} seconds",
                    START_TIMEOUT.as_secs()
                )));
            }

            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }
    }

    /// Stop the sidecar. Only a process we spawned is terminated; an adopted
    /// instance is left running. State is always reset.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;

        if state.owns_process {
            if let Some(mut child) = state.process.take() {
                tracing::info!("Stopping Ollama");
                terminate_child(&mut child).await;
                self.guard.unregister();
            }
        }

        state.process = None;
        state.started = false;
        state.owns_process = false;
    }

    // Model management

    #[allow(dead_code)] // Model management surface for the desktop shell
    pub async fn list_models(&self) -> SidecarResult<Vec<ModelInfo>> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let data: Value = response.json().await?;
        let models = data["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| serde_json::from_value(m.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    /// Check whether a model is downloaded: exact match, or match on the
    /// base name before the colon.
    #[allow(dead_code)] // Model management surface for the desktop shell
    pub async fn has_model(&self, model_name: &str) -> SidecarResult<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| model_matches(&m.name, model_name)))
    }

    /// Stream a model pull, reporting progress per NDJSON line.
    #[allow(dead_code)] // Model management surface for the desktop shell
    pub async fn pull_model<F>(&self, model_name: &str, mut on_progress: F) -> SidecarResult<()>
    where
        F: FnMut(PullProgress) + Send,
    {
        tracing::info!(model = model_name, "Pulling model");

        let response = self
            .http
            .post(format!("{}/api/pull", self.base_url))
            .json(&serde_json::json!({"name": model_name, "stream": true}))
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let Some(progress) = parse_pull_line(line.trim()) else {
                    continue;
                };
                let done = progress.status == "success";
                on_progress(progress);
                if done {
                    tracing::info!(model = model_name, "Model downloaded");
                    return Ok(());
                }
            }
        }

        tracing::info!(model = model_name, "Model pull completed");
        Ok(())
    }

    #[allow(dead_code)] // Model management surface for the desktop shell
    pub async fn delete_model(&self, model_name: &str) -> SidecarResult<bool> {
        let response = self
            .http
            .delete(format!("{}/api/delete", self.base_url))
            .json(&serde_json::json!({"name": model_name}))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

/// Exact name match, or base-name match before the colon: "mistral" matches
/// "mistral:7b-instruct".
pub(crate) fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    let installed_base = installed.split(':').next().unwrap_or(installed);
    let wanted_base = wanted.split(':').next().unwrap_or(wanted);
    installed_base == wanted_base
}

pub(crate) fn parse_pull_line(line: &str) -> Option<PullProgress> {
    if line.is_empty() {
        return None;
    }
    let data: Value = serde_json::from_str(line).ok()?;
    Some(PullProgress {
        status: data["status"].as_str().unwrap_or("").to_string(),
        completed: data["completed"].as_u64().unwrap_or(0),
        total: data["total"].as_u64().unwrap_or(0),
    })
}

fn platform_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            "darwin-arm64"
        } else {
            "darwin-x64"
        }
    } else if cfg!(target_os = "windows") {
        "win32-x64"
    } else {
        "linux-x64"
    }
}

fn binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "ollama.exe"
    } else {
        "ollama"
    }
}

/// Graceful terminate, escalating to kill after the grace period.
async fn terminate_child(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid.cast_signed()), Signal::SIGTERM);

        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(_) => {
                tracing::info!("Ollama stopped gracefully");
                return;
            }
            Err(_) => {
                tracing::warn!("Ollama didn't stop gracefully, killing");
            }
        }
    }

    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matching() {
        assert!(model_matches("mistral:7b-instruct", "mistral:7b-instruct"));
        assert!(model_matches("mistral:7b-instruct", "mistral"));
        assert!(model_matches("mistral", "mistral:7b-instruct"));
        assert!(!model_matches("llama3:8b", "mistral"));
    }

    #[test]
    fn test_parse_pull_line() {
        let progress =
            parse_pull_line(r#"{"status":"downloading","completed":1024,"total":4096}"#).unwrap();
        assert_eq!(progress.status, "downloading");
        assert_eq!(progress.completed, 1024);
        assert_eq!(progress.total, 4096);

        assert!(parse_pull_line("").is_none());
        assert!(parse_pull_line("not json").is_none());

        let done = parse_pull_line(r#"{"status":"success"}"#).unwrap();
        assert_eq!(done.status, "success");
        assert_eq!(done.completed, 0);
    }

    #[test]
    fn test_locate_bundled_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir
            .path()
            .join("ollama")
            .join(platform_dir())
            .join(binary_name());
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, b"fake").unwrap();

        let supervisor = OllamaSupervisor::new(
            "127.0.0.1",
            11434,
            dir.path().join("models"),
            Some(dir.path().to_path_buf()),
            true,
            dir.path().join(".ollama.pid"),
        );
        assert_eq!(supervisor.locate_binary().unwrap(), bundled);
    }

    #[test]
    fn test_locate_missing_reports_searched_paths() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = OllamaSupervisor::new(
            "127.0.0.1",
            11434,
            dir.path().join("models"),
            Some(dir.path().join("resources")),
            true,
            dir.path().join(".ollama.pid"),
        );

        // Only meaningful when no system ollama is installed
        if which::which("ollama").is_err() {
            let err = supervisor.locate_binary().unwrap_err();
            match err {
                SidecarError::NotFound { searched } => {
                    assert!(!searched.is_empty());
                }
                other => panic!("expected NotFound, got {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = OllamaSupervisor::new(
            "127.0.0.1",
            11434,
            dir.path().join("models"),
            None,
            false,
            dir.path().join(".ollama.pid"),
        );
        supervisor.stop().await;
        assert!(!supervisor.is_running().await);
    }
}
