use chrono::NaiveTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub mod tools;

pub use tools::ToolsConfig;

use crate::error::{RecoveryError, Result};

static CUTOFF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("Invalid regex pattern"));

/// Where the candidate account list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSource {
    Single(String),
    ListFile(PathBuf),
    Directory,
}

/// Wall-clock boundary after which no new account is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffTime {
    pub hour: u32,
    pub minute: u32,
}

impl CutoffTime {
    pub fn as_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// True once `now` is at or after the cutoff on the same day. There is
    /// no wrap past midnight: a cutoff earlier than the current time of day
    /// counts as already reached.
    pub fn reached(&self, now: NaiveTime) -> bool {
        now >= self.as_time()
    }
}

impl FromStr for CutoffTime {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            RecoveryError::Config(format!(
                "invalid cutoff time '{s}', expected h:mm or hh:mm"
            ))
        };
        let captures = CUTOFF_PATTERN.captures(s.trim()).ok_or_else(invalid)?;
        let hour: u32 = captures[1].parse().map_err(|_| invalid())?;
        let minute: u32 = captures[2].parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(Self { hour, minute })
    }
}

impl fmt::Display for CutoffTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour, self.minute)
    }
}

/// Immutable run configuration, built once from the invocation options.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source: AccountSource,
    pub dry_run: bool,
    pub restore_prefix_enabled: bool,
    pub count_limit: Option<u64>,
    pub cutoff: Option<CutoffTime>,
    pub checkpoint_log: Option<PathBuf>,
    /// File the run narration is appended to; the checkpoint log when one is given.
    pub run_log: Option<PathBuf>,
    pub email_on_exit: bool,
    pub tools: ToolsConfig,
}

impl RunConfig {
    /// Pick the single account source out of the three mutually exclusive options.
    pub fn select_source(
        user: Option<String>,
        list_file: Option<PathBuf>,
        directory: bool,
    ) -> Result<AccountSource> {
        match (user, list_file, directory) {
            (Some(user), None, false) => Ok(AccountSource::Single(user)),
            (None, Some(path), false) => Ok(AccountSource::ListFile(path)),
            (None, None, true) => Ok(AccountSource::Directory),
            (None, None, false) => Err(RecoveryError::Config(
                "one of -u, -f or -z is required".to_string(),
            )),
            _ => Err(RecoveryError::Config(
                "-u, -f and -z are mutually exclusive".to_string(),
            )),
        }
    }

    /// Reject configurations that would fail part-way through a run.
    pub fn validate(&self) -> Result<()> {
        if let AccountSource::ListFile(path) = &self.source {
            if !path.is_file() {
                return Err(RecoveryError::Config(format!(
                    "account list {} does not exist",
                    path.display()
                )));
            }
        }
        if let Some(path) = &self.checkpoint_log {
            if !path.is_file() {
                return Err(RecoveryError::Config(format!(
                    "checkpoint log {} does not exist",
                    path.display()
                )));
            }
        }
        if self.count_limit == Some(0) {
            return Err(RecoveryError::Config("-c must be at least 1".to_string()));
        }
        if self.email_on_exit && self.run_log.is_none() {
            return Err(RecoveryError::Config(
                "-e needs a run log; pass -p or --log-file".to_string(),
            ));
        }
        Ok(())
    }
}
