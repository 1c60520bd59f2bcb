//! Temporary file cleanup diagnostic
//!
//! Mutating tool with a protected-path deny list. Files modified within the
//! last hour are skipped.

use super::platform::{CommandExecutor, Platform};
use super::{Diagnostic, DiagnosticResult};
use crate::tools::{ParamType, ToolCategory, ToolDefinition, ToolParameter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

const MIN_AGE: Duration = Duration::from_secs(3600);

/// Directories that must never be deleted or recursed into destructively
pub(crate) const PROTECTED_DIRS: &[&str] = &[
    "/",
    "/bin",
    "/sbin",
    "/usr",
    "/etc",
    "/var",
    "/lib",
    "/lib64",
    "/System",
    "/Library",
    "/Applications",
    "C:\\Windows",
    "C:\\Windows\\System32",
    "C:\\Program Files",
];

pub(crate) fn is_protected_path(path: &Path) -> bool {
    let canonical = path.to_string_lossy();
    PROTECTED_DIRS
        .iter()
        .any(|p| canonical.eq_ignore_ascii_case(p))
}

fn cleanup_roots(platform: Platform, aggressive: bool) -> Vec<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    let home = PathBuf::from(home);

    let mut roots: Vec<PathBuf> = match platform {
        Platform::Macos => vec![home.join("Library/Caches"), PathBuf::from("/tmp")],
        Platform::Windows => {
            let mut v = Vec::new();
            if let Ok(temp) = std::env::var("TEMP") {
                v.push(PathBuf::from(temp));
            }
            v.push(PathBuf::from("C:\\Windows\\Temp"));
            v
        }
        _ => vec![
            PathBuf::from("/tmp"),
            PathBuf::from("/var/tmp"),
            home.join(".cache"),
        ],
    };

    if aggressive {
        match platform {
            Platform::Macos => roots.push(home.join("Library/Logs")),
            Platform::Windows => {}
            _ => roots.push(home.join(".local/share/Trash")),
        }
    }

    roots
}

#[derive(Debug, Default, Deserialize)]
struct CleanInput {
    #[serde(default)]
    aggressive: bool,
    #[serde(default)]
    dry_run: bool,
}

/// Remove temporary files to free disk space
pub struct CleanTempFiles {
    executor: CommandExecutor,
}

impl CleanTempFiles {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    /// Walk one root, deleting (or counting, in dry-run) stale regular files.
    fn sweep(root: &Path, dry_run: bool, deleted: &mut u64, freed: &mut u64, errors: &mut Vec<String>) {
        if is_protected_path(root) {
            errors.push(format!("refused protected path: {}", root.display()));
            return;
        }
        let Ok(entries) = std::fs::read_dir(root) else {
            return;
        };

        let cutoff = SystemTime::now() - MIN_AGE;
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            // Recently-touched files may still be in use
            match metadata.modified() {
                Ok(modified) if modified < cutoff => {}
                _ => continue,
            }

            if dry_run {
                *deleted += 1;
                *freed += metadata.len();
            } else {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        *deleted += 1;
                        *freed += metadata.len();
                    }
                    Err(e) => {
                        if errors.len() < 20 {
                            errors.push(format!("{}: {e}", path.display()));
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Diagnostic for CleanTempFiles {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "clean_temp_files".to_string(),
            display_name: "Clean Temp Files".to_string(),
            description: "Remove temporary files from standard cache and temp locations to free \
                          disk space. Skips files modified within the last hour."
                .to_string(),
            category: ToolCategory::System,
            osi_layer: 7,
            parameters: vec![
                ToolParameter::optional(
                    "aggressive",
                    ParamType::Boolean,
                    "Include additional cache locations",
                )
                .with_default(json!(false)),
                ToolParameter::optional(
                    "dry_run",
                    ParamType::Boolean,
                    "Report what would be deleted without deleting",
                )
                .with_default(json!(false)),
            ],
        }
    }

    async fn run(&self, args: Value, cancel: CancellationToken) -> DiagnosticResult {
        let platform = self.executor.platform();
        let input: CleanInput = serde_json::from_value(args).unwrap_or_default();

        let roots = cleanup_roots(platform, input.aggressive);
        let dry_run = input.dry_run;

        // Directory walking is blocking IO; run it off the async thread.
        let result = tokio::task::spawn_blocking(move || {
            let mut deleted = 0u64;
            let mut freed = 0u64;
            let mut errors = Vec::new();
            let mut scanned_roots = Vec::new();

            for root in roots {
                Self::sweep(&root, dry_run, &mut deleted, &mut freed, &mut errors);
                scanned_roots.push(root.display().to_string());
            }
            (deleted, freed, errors, scanned_roots)
        })
        .await;

        if cancel.is_cancelled() {
            return DiagnosticResult::failure("clean_temp_files", platform, "Cancelled");
        }

        let (deleted, freed, errors, scanned_roots) = match result {
            Ok(r) => r,
            Err(e) => {
                return DiagnosticResult::failure(
                    "clean_temp_files",
                    platform,
                    format!("Cleanup task failed: {e}"),
                )
            }
        };

        let mut data = Map::new();
        data.insert("files_deleted".to_string(), json!(deleted));
        data.insert("space_freed_bytes".to_string(), json!(freed));
        data.insert("dry_run".to_string(), json!(input.dry_run));
        data.insert("scanned_paths".to_string(), json!(scanned_roots));
        data.insert("errors".to_string(), json!(errors));

        let mut suggestions: Vec<String> = Vec::new();
        if input.dry_run {
            suggestions.push(format!(
                "Dry run: {deleted} file(s) totalling {freed} bytes would be removed"
            ));
        } else if deleted > 0 {
            suggestions.push(format!("Freed {freed} bytes across {deleted} file(s)"));
        } else {
            suggestions.push("No stale temporary files found".to_string());
        }

        DiagnosticResult::success("clean_temp_files", platform, data).with_suggestions(suggestions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_protected_paths() {
        assert!(is_protected_path(Path::new("/")));
        assert!(is_protected_path(Path::new("/usr")));
        assert!(is_protected_path(Path::new("C:\\Windows")));
        assert!(!is_protected_path(Path::new("/tmp")));
    }

    #[test]
    fn test_sweep_refuses_protected_root() {
        let mut deleted = 0;
        let mut freed = 0;
        let mut errors = Vec::new();
        CleanTempFiles::sweep(Path::new("/usr"), false, &mut deleted, &mut freed, &mut errors);
        assert_eq!(deleted, 0);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("refused protected path"));
    }

    #[test]
    fn test_sweep_skips_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fresh.tmp"), b"data").unwrap();

        let mut deleted = 0;
        let mut freed = 0;
        let mut errors = Vec::new();
        CleanTempFiles::sweep(dir.path(), false, &mut deleted, &mut freed, &mut errors);

        // Freshly written file is inside the one-hour safety window
        assert_eq!(deleted, 0);
        assert!(dir.path().join("fresh.tmp").exists());
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_deleting() {
        let tool = CleanTempFiles::new(CommandExecutor::default());
        let result = tool
            .run(json!({"dry_run": true}), CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.data["dry_run"], true);
    }
}
