//! End-of-run summary: per-account outcomes, and the optional emailed run log.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::classify::ProcessingOutcome;
use crate::config::ToolsConfig;
use crate::controller::RunExit;
use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub account: String,
    pub outcome: ProcessingOutcome,
}

/// Everything a run concluded, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: Vec<AccountRecord>,
    /// Accounts skipped because an earlier run already finished them.
    pub resumed: u64,
}

impl RunSummary {
    pub fn record(&mut self, account: &str, outcome: ProcessingOutcome) {
        self.records.push(AccountRecord {
            account: account.to_string(),
            outcome,
        });
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&ProcessingOutcome) -> bool,
    {
        self.records
            .iter()
            .filter(|record| predicate(&record.outcome))
            .count()
    }

    /// Plain-text email body.
    pub fn render(&self, exit: &RunExit) -> String {
        let mut body = format!("Run ended: {exit}\n\n");
        body.push_str(&format!("Already finished (resumed): {}\n", self.resumed));
        let labels = [
            ProcessingOutcome::Completed,
            ProcessingOutcome::SkippedNoArchive,
            ProcessingOutcome::SkippedNotInBackup,
            ProcessingOutcome::SkippedMissingBackup,
            ProcessingOutcome::SkippedNoData,
            ProcessingOutcome::RetriedThenFailed,
        ];
        for outcome in labels {
            let count = self.count_where(|seen| *seen == outcome);
            body.push_str(&format!("{}: {}\n", outcome.label(), count));
        }
        let aborted = self.count_where(|seen| matches!(seen, ProcessingOutcome::Aborted(_)));
        body.push_str(&format!("aborted: {aborted}\n"));

        if !self.records.is_empty() {
            body.push('\n');
            for record in &self.records {
                body.push_str(&format!("{}: {}\n", record.account, record.outcome));
            }
        }
        body
    }
}

/// Compresses the run log and mails it to the configured recipients.
#[derive(Clone)]
pub struct SummaryReporter {
    subprocess: SubprocessManager,
    tools: Arc<ToolsConfig>,
}

impl SummaryReporter {
    pub fn new(subprocess: SubprocessManager, tools: Arc<ToolsConfig>) -> Self {
        Self { subprocess, tools }
    }

    /// Best effort; failures are logged and never change the run's exit.
    pub async fn send(&self, log_path: Option<&Path>, summary: &RunSummary, exit: &RunExit) {
        if self.subprocess.dry_run() {
            info!("[dry run] Not sending the run summary");
            return;
        }
        if self.tools.mail_recipients.is_empty() {
            warn!("No mail recipients configured, run summary not sent");
            return;
        }
        let Some(log_path) = log_path else {
            warn!("No run log to attach, run summary not sent");
            return;
        };

        let attachment = match compress_log(log_path) {
            Ok(path) => path,
            Err(err) => {
                warn!("Failed to compress {}: {}", log_path.display(), err);
                return;
            }
        };

        let subject = format!("Mailbox recovery on {}: {}", get_hostname(), exit);
        let command = ProcessCommandBuilder::new(&self.tools.mailer)
            .args(["-s", &subject])
            .arg("-a")
            .arg(&attachment.to_string_lossy())
            .args(&self.tools.mail_recipients)
            .stdin(summary.render(exit))
            .build();
        let result = self.subprocess.mutate(command).await;
        if result.succeeded {
            info!(
                "Run summary sent to {}",
                self.tools.mail_recipients.join(", ")
            );
        } else {
            warn!("Failed to send run summary: {}", result.captured_text.trim());
        }
    }
}

/// Write `<log>.gz` next to the log and return its path.
fn compress_log(log_path: &Path) -> io::Result<PathBuf> {
    let mut target = log_path.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let mut source = File::open(log_path)?;
    let mut encoder = GzEncoder::new(File::create(&target)?, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?;
    Ok(target)
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
