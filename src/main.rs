use anyhow::Context;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use tracing::{debug, error, info, trace};

use mailrecover::config::{CutoffTime, RunConfig, ToolsConfig};
use mailrecover::controller::{RunController, RunExit};
use mailrecover::signal_handler::setup_interrupt_handlers;
use mailrecover::subprocess::SubprocessManager;
use mailrecover::{logging, RecoveryError};

/// Restore mailboxes from backup into their archive accounts, one account at a time
#[derive(Parser, Debug)]
#[command(name = "mailrecover", version)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["user", "file", "directory"])
))]
struct Cli {
    /// Recover a single account
    #[arg(short = 'u', value_name = "ACCOUNT")]
    user: Option<String>,

    /// Recover every account listed in this file, one per line
    #[arg(short = 'f', value_name = "PATH")]
    file: Option<PathBuf>,

    /// Recover every account known to the directory
    #[arg(short = 'z')]
    directory: bool,

    /// Log every mutating command instead of running it
    #[arg(short = 'n', long = "dry-run")]
    dry_run: bool,

    /// Import into the "restored" variant of each archive account
    #[arg(short = 'r', long = "restored-prefix")]
    restored_prefix: bool,

    /// Stop after this many accounts
    #[arg(short = 'c', long = "count", value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,

    /// Prior run log: finished accounts are skipped and this run appends to it
    #[arg(short = 'p', long = "previous-log", value_name = "PATH")]
    previous_log: Option<PathBuf>,

    /// Email the compressed run log when the run ends
    #[arg(short = 'e', long = "email")]
    email: bool,

    /// Do not start new accounts at or after this time of day (h:mm or hh:mm)
    ///
    /// Compared against the local time on the same day: the cutoff never
    /// rolls over midnight, so a run started after it stops before its first
    /// account. For an overnight window, start the run after midnight.
    #[arg(short = 't', long = "cutoff", value_name = "H:MM")]
    cutoff: Option<CutoffTime>,

    /// Tool configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append the run log to this file when no previous log is given
    #[arg(long, value_name = "PATH", conflicts_with = "previous_log")]
    log_file: Option<PathBuf>,

    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(exit) => exit.exit_code(),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RecoveryError>())
        .map(RecoveryError::exit_code)
        .unwrap_or(1)
}

fn build_config(cli: &Cli) -> Result<RunConfig, RecoveryError> {
    let source = RunConfig::select_source(cli.user.clone(), cli.file.clone(), cli.directory)?;
    let tools = ToolsConfig::load(cli.config.as_deref())?;
    let config = RunConfig {
        source,
        dry_run: cli.dry_run,
        restore_prefix_enabled: cli.restored_prefix,
        count_limit: cli.count,
        cutoff: cli.cutoff,
        checkpoint_log: cli.previous_log.clone(),
        run_log: cli.previous_log.clone().or_else(|| cli.log_file.clone()),
        email_on_exit: cli.email,
        tools,
    };
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<RunExit> {
    // Validate before the logger opens the run log, which would create a
    // missing checkpoint file.
    let config = build_config(&cli)?;
    logging::init_tracing(cli.verbose, config.run_log.as_deref())?;

    debug!("mailrecover started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());
    info!(
        "Starting recovery run{}",
        if config.dry_run { " (dry run)" } else { "" }
    );

    let interrupts = setup_interrupt_handlers().context("Failed to install signal handlers")?;
    let subprocess = SubprocessManager::production(config.dry_run);
    let report = RunController::new(config, subprocess)?
        .with_interrupts(interrupts)
        .run()
        .await?;

    Ok(report.exit)
}
