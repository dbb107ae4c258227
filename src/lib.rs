//! # mailrecover
//!
//! Bulk, resumable mailbox recovery. Every account is restored from backup
//! into a temporary recovery account, its messages for a fixed date window are
//! exported, repackaged and imported into the account's archive mailbox, and
//! the temporary account is deleted again whatever happened in between.
//!
//! ## Usage
//!
//! ```bash
//! mailrecover (-u <account> | -f <file> | -z) [-n] [-r] [-c <count>] [-p <log>] [-e] [-t <h:mm>]
//! ```
//!
//! ## Modules
//!
//! - `accounts` - Resolves the ordered account list from one source
//! - `checkpoint` - Resume support: finished accounts from a prior run log
//! - `classify` - Ordered rule table turning tool output into the next action
//! - `cleanup` - Idempotent removal of the recovery account and temp files
//! - `config` - Invocation options and the external tool configuration
//! - `controller` - The main loop with count limit, cutoff and interrupts
//! - `pipeline` - The per-account restore, export, transform, import sequence
//! - `report` - Run summary and the emailed run log
//! - `subprocess` - Process runner abstraction with a scriptable mock
pub mod accounts;
pub mod checkpoint;
pub mod classify;
pub mod cleanup;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod signal_handler;
pub mod state;
pub mod subprocess;

pub use error::{RecoveryError, Result};
