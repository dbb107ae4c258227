pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;
pub mod zimbra;

#[cfg(test)]
mod tests;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockCommandConfig, MockProcessRunner};
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use zimbra::ZimbraCommands;

use std::sync::Arc;
use tracing::info;

use crate::classify::StepResult;

/// Shared handle to the process runner, with run-log narration and dry-run
/// gating for every external call.
#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
    dry_run: bool,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    pub fn production(dry_run: bool) -> Self {
        Self::new(Arc::new(TokioProcessRunner), dry_run)
    }

    #[cfg(test)]
    pub fn mock(dry_run: bool) -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner, dry_run), mock)
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a read-only query. Queries run even in dry-run mode.
    pub async fn query(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        info!("Running: {}", command.display());
        self.runner.run(command).await
    }

    /// Run a command that changes server state. In dry-run mode the command is
    /// only narrated and reported as a success with no output.
    pub async fn mutate(&self, command: ProcessCommand) -> StepResult {
        if self.dry_run {
            info!("[dry run] Would run: {}", command.display());
            return StepResult::success(String::new());
        }
        info!("Running: {}", command.display());
        StepResult::from_output(self.runner.run(command).await)
    }
}
