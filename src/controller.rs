//! The run controller: resolves the work queue once, then drives every
//! account through the pipeline, the cleanup and the stop policies.

use chrono::{Local, NaiveTime};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::accounts;
use crate::checkpoint::{completion_marker, CheckpointStore};
use crate::cleanup::Compensator;
use crate::config::{RunConfig, ToolsConfig};
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::report::{RunSummary, SummaryReporter};
use crate::signal_handler::{InterruptKind, InterruptListener};
use crate::state::RunState;
use crate::subprocess::SubprocessManager;

/// Source of the local time of day, consulted for the cutoff.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// Why the run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    Finished,
    CountLimitReached,
    CutoffReached,
    Aborted(String),
    Interrupted(InterruptKind),
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::Finished | RunExit::CountLimitReached | RunExit::CutoffReached => 0,
            RunExit::Aborted(_) => 1,
            RunExit::Interrupted(kind) => kind.exit_code(),
        }
    }
}

impl fmt::Display for RunExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunExit::Finished => f.write_str("finished"),
            RunExit::CountLimitReached => f.write_str("count limit reached"),
            RunExit::CutoffReached => f.write_str("cutoff time reached"),
            RunExit::Aborted(reason) => write!(f, "aborted: {}", reason.trim()),
            RunExit::Interrupted(kind) => write!(f, "interrupted by {kind}"),
        }
    }
}

/// What a completed run hands back to the binary.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit: RunExit,
    pub state: RunState,
    pub summary: RunSummary,
}

pub struct RunController {
    config: RunConfig,
    subprocess: SubprocessManager,
    tools: Arc<ToolsConfig>,
    pipeline: Pipeline,
    compensator: Compensator,
    reporter: SummaryReporter,
    checkpoint: CheckpointStore,
    clock: Box<dyn Clock>,
    interrupts: Option<InterruptListener>,
}

impl RunController {
    /// Build a controller. Reads the prior run log now, so a missing
    /// checkpoint file fails before any account is touched.
    pub fn new(config: RunConfig, subprocess: SubprocessManager) -> Result<Self> {
        let checkpoint = CheckpointStore::from_optional_path(config.checkpoint_log.as_deref())?;
        let tools = Arc::new(config.tools.clone());
        let logs = config.run_log.iter().chain(&config.checkpoint_log).cloned();
        let compensator = Compensator::new(subprocess.clone(), tools.clone())
            .with_protected_paths(logs.collect::<Vec<_>>());
        Ok(Self {
            pipeline: Pipeline::new(
                subprocess.clone(),
                tools.clone(),
                config.restore_prefix_enabled,
            ),
            compensator,
            reporter: SummaryReporter::new(subprocess.clone(), tools.clone()),
            checkpoint,
            clock: Box::new(SystemClock),
            interrupts: None,
            subprocess,
            tools,
            config,
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_interrupts(mut self, listener: InterruptListener) -> Self {
        self.interrupts = Some(listener);
        self
    }

    /// Run to completion. Errors are startup failures only; an interrupt,
    /// even one that lands while the account list is being resolved, ends in
    /// a [`RunExit`] like every other stop.
    pub async fn run(mut self) -> Result<RunReport> {
        let mut state = RunState::new();
        let mut summary = RunSummary::default();
        let exit = match self.resolve_accounts().await? {
            Ok(accounts) => self.drive(&accounts, &mut state, &mut summary).await,
            Err(kind) => {
                warn!("Interrupted by {} while resolving accounts", kind);
                RunExit::Interrupted(kind)
            }
        };
        state.stopped = true;

        match &exit {
            RunExit::Aborted(reason) => error!("Run aborted: {}", reason),
            other => info!(
                "Run {}: {} account(s) processed, {} seen",
                other, state.processed_count, state.total_seen
            ),
        }

        if self.config.email_on_exit {
            self.reporter
                .send(self.config.run_log.as_deref(), &summary, &exit)
                .await;
        }

        Ok(RunReport {
            exit,
            state,
            summary,
        })
    }

    /// The work queue, or the interrupt that arrived before it was ready.
    async fn resolve_accounts(
        &mut self,
    ) -> Result<std::result::Result<Vec<String>, InterruptKind>> {
        let resolving = accounts::resolve(&self.config.source, &self.tools, &self.subprocess);
        match self.interrupts.as_mut() {
            Some(listener) => tokio::select! {
                biased;
                kind = listener.recv() => Ok(Err(kind)),
                accounts = resolving => accounts.map(Ok),
            },
            None => resolving.await.map(Ok),
        }
    }

    fn pending_interrupt(&mut self) -> Option<InterruptKind> {
        self.interrupts.as_mut().and_then(InterruptListener::try_recv)
    }

    async fn drive(
        &mut self,
        accounts: &[String],
        state: &mut RunState,
        summary: &mut RunSummary,
    ) -> RunExit {
        let total = accounts.len();
        for (index, account) in accounts.iter().enumerate() {
            if let Some(kind) = self.pending_interrupt() {
                warn!("Interrupted by {} before {}", kind, account);
                return RunExit::Interrupted(kind);
            }
            state.total_seen += 1;
            if self.checkpoint.already_finished(account) {
                info!("Skipping {}, finished by an earlier run", account);
                summary.resumed += 1;
                continue;
            }

            if let Some(cutoff) = self.config.cutoff {
                if cutoff.reached(self.clock.now()) {
                    info!("Cutoff {} reached, not starting {}", cutoff, account);
                    return RunExit::CutoffReached;
                }
            }

            info!("Processing {} ({}/{})", account, index + 1, total);
            state.begin_account(account);
            let processed = match self.interrupts.as_mut() {
                Some(listener) => tokio::select! {
                    biased;
                    kind = listener.recv() => Err(kind),
                    outcome = self.pipeline.process(account, state) => Ok(outcome),
                },
                None => Ok(self.pipeline.process(account, state).await),
            };
            if processed.is_err() {
                self.pipeline.settle().await;
            }
            self.compensator.cleanup(state).await;
            state.end_account();

            let outcome = match processed {
                Ok(outcome) => outcome,
                Err(kind) => {
                    warn!("Interrupted by {} while processing {}", kind, account);
                    return RunExit::Interrupted(kind);
                }
            };

            summary.record(account, outcome.clone());
            if outcome.is_fatal() {
                return RunExit::Aborted(format!("{account}: {outcome}"));
            }

            info!("{}: {}", account, outcome);
            info!(
                "{}",
                completion_marker(account, Local::now(), self.config.dry_run)
            );
            state.processed_count += 1;

            if let Some(limit) = self.config.count_limit {
                if state.processed_count >= limit {
                    info!("Count limit of {} reached", limit);
                    return RunExit::CountLimitReached;
                }
            }
        }

        if let Some(kind) = self.pending_interrupt() {
            warn!("Interrupted by {} after the last account", kind);
            return RunExit::Interrupted(kind);
        }
        RunExit::Finished
    }
}
