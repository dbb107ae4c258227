//! Tracing setup: a console layer whose level follows `-v`, and an optional
//! run-log layer that appends plain text to the checkpoint file.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{RecoveryError, Result};

/// Console filter for a `-v` count. `RUST_LOG` wins when set.
pub fn console_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber.
///
/// The run-log layer has a fixed `info` filter so completion markers land in
/// the file whatever the console verbosity is.
pub fn init_tracing(verbosity: u8, run_log: Option<&Path>) -> Result<()> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directive(verbosity)));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 2)
        .with_line_number(verbosity >= 3)
        .with_filter(console_filter);

    let file_layer = match run_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| RecoveryError::UnreadableFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| RecoveryError::Config(format!("cannot install logger: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(console_directive(0), "info");
        assert_eq!(console_directive(1), "debug");
        assert_eq!(console_directive(2), "trace");
        assert_eq!(console_directive(7), "trace");
    }
}
