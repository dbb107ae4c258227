//! The per-account recovery pipeline.
//!
//! Steps, in order: resolve the target archive, restore into a temporary
//! recovery account, strip its forwarding attribute, drop its list
//! memberships, export the date window, repackage the export, import it into
//! the archive. Any skip or abort returns at once; the caller owns cleanup.

pub mod transform;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classify::{classify, ProcessingAction, ProcessingOutcome, StepKind};
use crate::config::ToolsConfig;
use crate::state::RunState;
use crate::subprocess::{zimbra, ProcessCommand, SubprocessManager, ZimbraCommands};

/// Temporary files and directories used for one account. Every name starts
/// with the configured temporary prefix, which is what cleanup matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    pub export_file: PathBuf,
    pub extract_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub import_file: PathBuf,
}

impl WorkPaths {
    pub fn new(work_dir: &Path, prefix: &str, account: &str) -> Self {
        let tag: String = account
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        Self {
            export_file: work_dir.join(format!("{prefix}export-{tag}.tgz")),
            extract_dir: work_dir.join(format!("{prefix}extract-{tag}")),
            staging_dir: work_dir.join(format!("{prefix}staging-{tag}")),
            import_file: work_dir.join(format!("{prefix}import-{tag}.tgz")),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    subprocess: SubprocessManager,
    tools: Arc<ToolsConfig>,
    restore_prefix_enabled: bool,
    /// Held by the blocking repackage task for as long as it runs.
    transform_busy: Arc<Mutex<()>>,
    cancel_transform: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        subprocess: SubprocessManager,
        tools: Arc<ToolsConfig>,
        restore_prefix_enabled: bool,
    ) -> Self {
        Self {
            subprocess,
            tools,
            restore_prefix_enabled,
            transform_busy: Arc::new(Mutex::new(())),
            cancel_transform: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop a repackage task left running by a dropped [`Pipeline::process`]
    /// and wait until it no longer touches the work directory. Returns at once
    /// when nothing is running.
    pub async fn settle(&self) {
        self.cancel_transform.store(true, Ordering::SeqCst);
        let _idle = self.transform_busy.lock().await;
        debug!("No repackaging in flight");
    }

    fn commands(&self) -> ZimbraCommands<'_> {
        ZimbraCommands::new(&self.tools)
    }

    pub async fn process(&self, account: &str, state: &mut RunState) -> ProcessingOutcome {
        let archive = match self.resolve_archive(account).await {
            Ok(Some(archive)) => archive,
            Ok(None) => {
                info!("{} has no archive account", account);
                return ProcessingOutcome::SkippedNoArchive;
            }
            Err(outcome) => return outcome,
        };
        info!("Target archive for {} is {}", account, archive);

        let recovery = self.commands().recovery_account(account);
        state.current_recovery_account = Some(recovery.clone());
        if let Some(outcome) = self.restore(account).await {
            return outcome;
        }

        self.clear_forwarding(&recovery).await;
        self.remove_memberships(&recovery).await;

        let paths = WorkPaths::new(&self.tools.work_dir, &self.tools.temp_prefix, account);
        let export = self.commands().export(&recovery, &paths.export_file);
        match self.run_classified(StepKind::Export, export).await {
            ProcessingAction::Proceed => {}
            other => return outcome_for(other),
        }

        let staged = match self.repackage(&paths).await {
            Ok(staged) => staged,
            Err(outcome) => return outcome,
        };
        if staged == 0 {
            info!("Export for {} holds no messages, nothing to import", account);
            return ProcessingOutcome::Completed;
        }

        let import = self.commands().import(&archive, &paths.import_file);
        let result = self.subprocess.mutate(import).await;
        if !result.succeeded {
            return ProcessingOutcome::Aborted(format!(
                "import into {} failed: {}",
                archive,
                result.captured_text.trim()
            ));
        }

        ProcessingOutcome::Completed
    }

    /// The archive account to import into, `None` when the account has none.
    async fn resolve_archive(&self, account: &str) -> Result<Option<String>, ProcessingOutcome> {
        let output = self
            .subprocess
            .query(self.commands().archive_account(account))
            .await
            .map_err(|err| {
                ProcessingOutcome::Aborted(format!("archive lookup for {account} failed: {err}"))
            })?;
        if !output.status.success() {
            return Err(ProcessingOutcome::Aborted(format!(
                "archive lookup for {} failed: {}",
                account,
                output.combined_text().trim()
            )));
        }

        Ok(zimbra::parse_archive_account(&output.stdout).map(|archive| {
            if self.restore_prefix_enabled {
                format!("{}{}", self.tools.restored_prefix, archive)
            } else {
                archive
            }
        }))
    }

    /// Restore into the recovery account, escalating once on a generic
    /// failure. `None` means the restore succeeded.
    async fn restore(&self, account: &str) -> Option<ProcessingOutcome> {
        let first = self
            .run_classified(StepKind::Restore, self.commands().restore(account, false))
            .await;
        let (action, escalated) = match first {
            ProcessingAction::RetryStep { escalate: true, .. } => {
                warn!(
                    "Restore of {} failed, retrying with {}",
                    account,
                    zimbra::IGNORE_REPLAY_ERRORS
                );
                let command = self.commands().restore(account, true);
                (
                    self.run_classified(StepKind::RestoreEscalated, command).await,
                    true,
                )
            }
            other => (other, false),
        };

        match action {
            ProcessingAction::Proceed => None,
            ProcessingAction::AbortRun(reason) if escalated => {
                warn!("Escalated restore of {} failed: {}", account, reason.trim());
                Some(ProcessingOutcome::RetriedThenFailed)
            }
            other => Some(outcome_for(other)),
        }
    }

    /// Run a mutating step and classify it, sitting out transient server
    /// errors for as long as they persist.
    async fn run_classified(&self, step: StepKind, command: ProcessCommand) -> ProcessingAction {
        loop {
            let result = self.subprocess.mutate(command.clone()).await;
            match classify(step, &result) {
                ProcessingAction::RetryStep {
                    after,
                    escalate: false,
                } => {
                    warn!(
                        "{:?} step hit a transient server error, retrying in {:?}",
                        step, after
                    );
                    tokio::time::sleep(after).await;
                }
                action => {
                    if let ProcessingAction::SkipAccount(outcome) = &action {
                        info!("{:?} step classified: {}", step, outcome);
                    }
                    return action;
                }
            }
        }
    }

    async fn clear_forwarding(&self, recovery: &str) {
        let result = self
            .subprocess
            .mutate(self.commands().clear_forwarding(recovery))
            .await;
        if !result.succeeded {
            warn!(
                "Could not clear forwarding on {}: {}",
                recovery,
                result.captured_text.trim()
            );
        }
    }

    async fn remove_memberships(&self, recovery: &str) {
        if self.subprocess.dry_run() {
            info!("[dry run] Would remove list memberships of {}", recovery);
            return;
        }

        let lists = match self
            .subprocess
            .query(self.commands().memberships(recovery))
            .await
        {
            Ok(output) if output.status.success() => zimbra::parse_memberships(&output.stdout),
            Ok(output) => {
                warn!(
                    "Could not list memberships of {}: {}",
                    recovery,
                    output.combined_text().trim()
                );
                return;
            }
            Err(err) => {
                warn!("Could not list memberships of {}: {}", recovery, err);
                return;
            }
        };

        for list in lists {
            let result = self
                .subprocess
                .mutate(self.commands().remove_membership(&list, recovery))
                .await;
            if !result.succeeded {
                warn!(
                    "Could not remove {} from {}: {}",
                    recovery,
                    list,
                    result.captured_text.trim()
                );
            }
        }
    }

    async fn repackage(&self, paths: &WorkPaths) -> Result<usize, ProcessingOutcome> {
        if self.subprocess.dry_run() {
            info!(
                "[dry run] Would repackage {} into {}",
                paths.export_file.display(),
                paths.import_file.display()
            );
            return Ok(1);
        }

        let busy = self.transform_busy.clone().lock_owned().await;
        self.cancel_transform.store(false, Ordering::SeqCst);
        let cancel = self.cancel_transform.clone();
        let task_paths = paths.clone();
        let extension = self.tools.message_extension.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _busy = busy;
            transform::repackage_export(&task_paths, &extension, &cancel)
        })
        .await;

        match joined {
            Ok(Ok(staged)) => {
                info!("Repackaged {} message(s)", staged);
                Ok(staged)
            }
            Ok(Err(err)) => Err(ProcessingOutcome::Aborted(err.to_string())),
            Err(err) => Err(ProcessingOutcome::Aborted(format!(
                "repackaging task failed: {err}"
            ))),
        }
    }
}

/// Map an action that ends the account early onto its outcome.
fn outcome_for(action: ProcessingAction) -> ProcessingOutcome {
    match action {
        ProcessingAction::SkipAccount(outcome) => outcome,
        ProcessingAction::AbortRun(reason) => ProcessingOutcome::Aborted(reason),
        other => ProcessingOutcome::Aborted(format!("unexpected step action {other:?}")),
    }
}
