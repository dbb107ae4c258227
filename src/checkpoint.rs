//! Resume support built on the run log.
//!
//! A run narrates `finished <account> at <timestamp>` for every account it
//! concludes. A later run handed that log skips those accounts. Dry runs
//! write the same line behind [`DRY_RUN_TAG`], which resume ignores.

use chrono::{DateTime, Local};
use std::path::Path;

use crate::error::{RecoveryError, Result};

/// Prefix on every marker written by a dry run.
pub const DRY_RUN_TAG: &str = "[dry run] ";

/// The completion marker line for `account`.
pub fn completion_marker(account: &str, at: DateTime<Local>, dry_run: bool) -> String {
    let tag = if dry_run { DRY_RUN_TAG } else { "" };
    format!("{}finished {} at {}", tag, account, at.to_rfc3339())
}

/// Snapshot of a prior run log, queried for finished accounts.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    lines: Option<Vec<String>>,
}

impl CheckpointStore {
    /// A store that never reports an account as finished.
    pub fn disabled() -> Self {
        Self { lines: None }
    }

    /// Read the prior run log. A missing or unreadable file is a
    /// configuration error, never an empty checkpoint.
    pub fn open(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| RecoveryError::UnreadableFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_log_text(&contents))
    }

    pub fn from_log_text(contents: &str) -> Self {
        Self {
            lines: Some(contents.lines().map(str::to_lowercase).collect()),
        }
    }

    pub fn from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::disabled()),
        }
    }

    pub fn already_finished(&self, account: &str) -> bool {
        let Some(lines) = &self.lines else {
            return false;
        };
        let needle = format!("finished {} at", account.to_lowercase());
        let rehearsal = format!("{DRY_RUN_TAG}{needle}");
        lines
            .iter()
            .any(|line| line.contains(&needle) && !line.contains(&rehearsal))
    }
}
