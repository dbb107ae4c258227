//! Output-based failure classification.
//!
//! The recovery tools report what happened only through free-form text and a
//! coarse success flag. [`classify`] turns one step's result into the action
//! the pipeline takes next, using an ordered rule table: rules are evaluated
//! top to bottom and the first match wins.

use std::fmt;
use std::time::Duration;

use crate::subprocess::{ProcessError, ProcessOutput};

/// Delay before a step that hit a transient server error is re-issued.
pub const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(600);

/// How processing of one account ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Completed,
    SkippedNoArchive,
    SkippedNotInBackup,
    SkippedMissingBackup,
    SkippedNoData,
    /// The escalated restore retry failed as well.
    RetriedThenFailed,
    Aborted(String),
}

impl ProcessingOutcome {
    /// Fatal outcomes end the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProcessingOutcome::RetriedThenFailed | ProcessingOutcome::Aborted(_)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Completed => "completed",
            ProcessingOutcome::SkippedNoArchive => "skipped (no archive account)",
            ProcessingOutcome::SkippedNotInBackup => "skipped (not found in backup)",
            ProcessingOutcome::SkippedMissingBackup => "skipped (no full backup before restore time)",
            ProcessingOutcome::SkippedNoData => "skipped (no data in export window)",
            ProcessingOutcome::RetriedThenFailed => "failed after escalated retry",
            ProcessingOutcome::Aborted(_) => "aborted",
        }
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingOutcome::Aborted(reason) => write!(f, "aborted: {}", reason.trim()),
            other => f.write_str(other.label()),
        }
    }
}

/// Which pipeline step produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Restore,
    /// Restore re-issued with the ignore-replay-errors modifier.
    RestoreEscalated,
    Export,
}

/// Result of one external call, as seen by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub succeeded: bool,
    pub captured_text: String,
}

impl StepResult {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            captured_text: text.into(),
        }
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            captured_text: text.into(),
        }
    }

    /// Fold a runner result into a step result; a command that could not be
    /// started counts as a failure carrying the error text.
    pub fn from_output(output: Result<ProcessOutput, ProcessError>) -> Self {
        match output {
            Ok(output) => Self {
                succeeded: output.status.success(),
                captured_text: output.combined_text(),
            },
            Err(err) => Self::failure(err.to_string()),
        }
    }
}

/// What the pipeline does after a classified step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingAction {
    Proceed,
    SkipAccount(ProcessingOutcome),
    /// Re-issue the step after `after`; `escalate` adds the ignore-replay-errors modifier.
    RetryStep { after: Duration, escalate: bool },
    AbortRun(String),
}

enum Matcher {
    Contains(&'static str),
    ContainsAll(&'static [&'static str]),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Matcher::Contains(needle) => text.contains(needle),
            Matcher::ContainsAll(needles) => needles.iter().all(|needle| text.contains(needle)),
        }
    }
}

enum RuleAction {
    Skip(ProcessingOutcome),
    RetryAfterDelay,
}

/// One entry of the classification policy.
pub struct ClassificationRule {
    matcher: Matcher,
    action: RuleAction,
}

impl ClassificationRule {
    fn action(&self) -> ProcessingAction {
        match &self.action {
            RuleAction::Skip(outcome) => ProcessingAction::SkipAccount(outcome.clone()),
            RuleAction::RetryAfterDelay => ProcessingAction::RetryStep {
                after: TRANSIENT_RETRY_DELAY,
                escalate: false,
            },
        }
    }
}

/// The text rules, in precedence order.
static TEXT_RULES: [ClassificationRule; 4] = [
    ClassificationRule {
        matcher: Matcher::Contains("not found in backup"),
        action: RuleAction::Skip(ProcessingOutcome::SkippedNotInBackup),
    },
    ClassificationRule {
        matcher: Matcher::Contains("Missing full backup earlier than restore-to time for account"),
        action: RuleAction::Skip(ProcessingOutcome::SkippedMissingBackup),
    },
    ClassificationRule {
        matcher: Matcher::ContainsAll(&["status=204", "No data found"]),
        action: RuleAction::Skip(ProcessingOutcome::SkippedNoData),
    },
    ClassificationRule {
        matcher: Matcher::Contains("Internal Server Error"),
        action: RuleAction::RetryAfterDelay,
    },
];

/// Classify one step result. Deterministic: the same text and success flag
/// always give the same action.
pub fn classify(step: StepKind, result: &StepResult) -> ProcessingAction {
    if let Some(rule) = TEXT_RULES
        .iter()
        .find(|rule| rule.matcher.matches(&result.captured_text))
    {
        return rule.action();
    }

    if result.succeeded {
        return ProcessingAction::Proceed;
    }

    match step {
        StepKind::Restore => ProcessingAction::RetryStep {
            after: Duration::ZERO,
            escalate: true,
        },
        StepKind::RestoreEscalated | StepKind::Export => {
            ProcessingAction::AbortRun(result.captured_text.clone())
        }
    }
}
