//! Compensating cleanup for one account.
//!
//! The single cleanup entry point for the main loop, fatal exits and the
//! interrupt path. Safe to call repeatedly and with a partially-progressed
//! state; it never fails the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ToolsConfig;
use crate::state::RunState;
use crate::subprocess::{SubprocessManager, ZimbraCommands};

#[derive(Clone)]
pub struct Compensator {
    subprocess: SubprocessManager,
    tools: Arc<ToolsConfig>,
    /// Files the sweep never removes, even when their names carry the
    /// temporary prefix: the run log and the prior log.
    protected: Vec<PathBuf>,
}

impl Compensator {
    pub fn new(subprocess: SubprocessManager, tools: Arc<ToolsConfig>) -> Self {
        Self {
            subprocess,
            tools,
            protected: Vec::new(),
        }
    }

    pub fn with_protected_paths<I>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        self.protected.extend(paths);
        self
    }

    pub async fn cleanup(&self, state: &mut RunState) {
        if let Some(recovery) = state.current_recovery_account.clone() {
            info!("Deleting recovery account {}", recovery);
            let result = self
                .subprocess
                .mutate(ZimbraCommands::new(&self.tools).delete_account(&recovery))
                .await;
            if !result.succeeded {
                warn!(
                    "Failed to delete recovery account {}: {}",
                    recovery,
                    result.captured_text.trim()
                );
            }
        }

        self.remove_temp_artifacts();
        state.current_recovery_account = None;
    }

    /// Remove every entry in the working directory carrying the temporary prefix.
    fn remove_temp_artifacts(&self) {
        let work_dir = &self.tools.work_dir;
        let entries = match std::fs::read_dir(work_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Cannot scan {} for temporary files: {}", work_dir.display(), err);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(&self.tools.temp_prefix) {
                continue;
            }
            let path = entry.path();
            if self.is_protected(&path) {
                debug!("Keeping {}, it holds a run log", path.display());
                continue;
            }
            if self.subprocess.dry_run() {
                info!("[dry run] Would remove {}", path.display());
                continue;
            }
            match remove_path(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(err) => warn!("Failed to remove {}: {}", path.display(), err),
            }
        }
    }

    /// True when `path` is a protected file or a directory containing one.
    fn is_protected(&self, path: &Path) -> bool {
        let candidate = canonical(path);
        self.protected
            .iter()
            .any(|kept| canonical(kept).starts_with(&candidate))
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn compensator(work_dir: &Path, dry_run: bool) -> (Compensator, crate::subprocess::MockProcessRunner) {
        let (subprocess, mut mock) = SubprocessManager::mock(dry_run);
        mock.expect_command("zmprov")
            .with_args(|args| args.first().map(String::as_str) == Some("da"))
            .returns_success()
            .finish();
        let tools = ToolsConfig {
            work_dir: work_dir.to_path_buf(),
            ..ToolsConfig::default()
        };
        (Compensator::new(subprocess, Arc::new(tools)), mock)
    }

    fn deletions(mock: &crate::subprocess::MockProcessRunner) -> usize {
        mock.count_calls("zmprov", |args| args.first().map(String::as_str) == Some("da"))
    }

    #[tokio::test]
    async fn test_cleanup_deletes_recovery_account_and_temp_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("mailrecover-extract-a")).unwrap();
        std::fs::write(dir.path().join("mailrecover-export-a.tgz"), b"x").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();
        let (compensator, mock) = compensator(dir.path(), false);

        let mut state = RunState::new();
        state.current_recovery_account = Some("recover_a@example.com".into());
        compensator.cleanup(&mut state).await;

        assert_eq!(deletions(&mock), 1);
        assert_eq!(
            mock.get_call_history()[0].args,
            vec!["da", "recover_a@example.com"]
        );
        assert!(state.current_recovery_account.is_none());
        assert!(!dir.path().join("mailrecover-extract-a").exists());
        assert!(!dir.path().join("mailrecover-export-a.tgz").exists());
        assert!(dir.path().join("unrelated.txt").exists());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_prefixed_run_logs() {
        let dir = TempDir::new().unwrap();
        let run_log = dir.path().join("mailrecover-run.log");
        let logs_dir = dir.path().join("mailrecover-logs");
        std::fs::create_dir(&logs_dir).unwrap();
        std::fs::write(&run_log, b"finished a@example.com at 2024-03-01\n").unwrap();
        std::fs::write(logs_dir.join("prior.log"), b"").unwrap();
        std::fs::write(dir.path().join("mailrecover-export-a.tgz"), b"x").unwrap();
        let (compensator, _mock) = compensator(dir.path(), false);
        let compensator =
            compensator.with_protected_paths([run_log.clone(), logs_dir.join("prior.log")]);

        compensator.cleanup(&mut RunState::new()).await;

        assert!(run_log.exists());
        assert!(logs_dir.join("prior.log").exists());
        assert!(!dir.path().join("mailrecover-export-a.tgz").exists());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (compensator, mock) = compensator(dir.path(), false);

        let mut state = RunState::new();
        state.current_recovery_account = Some("recover_a@example.com".into());
        compensator.cleanup(&mut state).await;
        compensator.cleanup(&mut state).await;

        assert_eq!(deletions(&mock), 1);
    }

    #[tokio::test]
    async fn test_cleanup_without_recovery_account_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let (compensator, mock) = compensator(dir.path(), false);

        compensator.cleanup(&mut RunState::new()).await;

        assert!(mock.get_call_history().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_is_not_escalated() {
        let dir = TempDir::new().unwrap();
        let (subprocess, mut mock) = SubprocessManager::mock(false);
        mock.expect_command("zmprov")
            .returns_stderr("ERROR: account.NO_SUCH_ACCOUNT")
            .returns_exit_code(2)
            .finish();
        let tools = ToolsConfig {
            work_dir: dir.path().to_path_buf(),
            ..ToolsConfig::default()
        };
        let compensator = Compensator::new(subprocess, Arc::new(tools));

        let mut state = RunState::new();
        state.current_recovery_account = Some("recover_a@example.com".into());
        compensator.cleanup(&mut state).await;

        assert!(state.current_recovery_account.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_cleanup_touches_nothing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mailrecover-export-a.tgz"), b"x").unwrap();
        let (compensator, mock) = compensator(dir.path(), true);

        let mut state = RunState::new();
        state.current_recovery_account = Some("recover_a@example.com".into());
        compensator.cleanup(&mut state).await;

        assert!(mock.get_call_history().is_empty());
        assert!(dir.path().join("mailrecover-export-a.tgz").exists());
        assert!(state.current_recovery_account.is_none());
    }
}
