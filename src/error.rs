use std::path::PathBuf;
use thiserror::Error;

use crate::subprocess::ProcessError;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cannot read {}: {source}", path.display())]
    UnreadableFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tool configuration in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Account listing failed: {0}")]
    Listing(String),

    #[error("Archive transform failed: {0}")]
    Transform(String),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecoveryError {
    /// Whether the error happened while validating the invocation, before any
    /// account was touched.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            RecoveryError::Config(_)
                | RecoveryError::UnreadableFile { .. }
                | RecoveryError::Toml { .. }
                | RecoveryError::Listing(_)
        )
    }

    /// Process exit code for a run that ends with this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_config() {
            2
        } else {
            1
        }
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;
