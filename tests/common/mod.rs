//! Common test utilities and helpers

#![allow(dead_code)]

use chrono::NaiveTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use mailrecover::config::{AccountSource, RunConfig, ToolsConfig};
use mailrecover::controller::{Clock, RunController};
use mailrecover::pipeline::WorkPaths;
use mailrecover::subprocess::zimbra::IGNORE_REPLAY_ERRORS;
use mailrecover::subprocess::{MockProcessRunner, ProcessRunner, SubprocessManager};

/// How the scripted tools behave for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountScript {
    NoArchive,
    NoData,
    Complete,
    ImportFails,
    /// Plain and escalated restore both fail with unrecognised text.
    RestoreFailsTwice,
    /// Restore keeps answering with a transient server error.
    RestoreUnavailable,
}

/// Scratch directory plus a scripted stand-in for every external tool.
pub struct TestContext {
    pub mock: MockProcessRunner,
    dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("work")).unwrap();
        let mut context = Self {
            mock: MockProcessRunner::new(),
            dir,
        };
        context.script_best_effort_steps();
        context
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn write_list(&self, accounts: &[&str]) -> PathBuf {
        let path = self.dir.path().join("accounts.txt");
        fs::write(&path, accounts.join("\n")).unwrap();
        path
    }

    pub fn write_file(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn config(&self, source: AccountSource) -> RunConfig {
        RunConfig {
            source,
            dry_run: false,
            restore_prefix_enabled: false,
            count_limit: None,
            cutoff: None,
            checkpoint_log: None,
            run_log: None,
            email_on_exit: false,
            tools: ToolsConfig {
                work_dir: self.work_dir(),
                ..ToolsConfig::default()
            },
        }
    }

    pub fn controller(&self, config: RunConfig) -> RunController {
        let runner = Arc::new(self.mock.clone()) as Arc<dyn ProcessRunner>;
        let subprocess = SubprocessManager::new(runner, config.dry_run);
        RunController::new(config, subprocess).unwrap()
    }

    /// Register the responses the tools give for `account`.
    pub fn script(&mut self, account: &str, script: AccountScript) {
        let recovery = format!("recover_{account}");
        let archive = format!("{account}.archive");

        let archive_output = match script {
            AccountScript::NoArchive => format!("# name {account}\n"),
            _ => format!("# name {account}\nzimbraArchiveAccount: {archive}\n"),
        };
        let owner = account.to_string();
        self.mock
            .expect_command("zmprov")
            .with_args(move |args| args.first().map(String::as_str) == Some("ga") && args[1] == owner)
            .returns_stdout(&archive_output)
            .finish();

        let (restore_text, restore_code) = match script {
            AccountScript::RestoreFailsTwice => ("redo log replay failed", 1),
            AccountScript::RestoreUnavailable => ("HTTP/1.1 500 Internal Server Error", 1),
            _ => ("", 0),
        };
        let owner = account.to_string();
        self.mock
            .expect_command("zmrestore")
            .with_args(move |args| args.get(1) == Some(&owner))
            .returns_stderr(restore_text)
            .returns_exit_code(restore_code)
            .finish();

        let (export_text, export_code) = match script {
            AccountScript::NoData => ("ERROR: status=204.  No data found", 1),
            _ => ("", 0),
        };
        let owner = recovery.clone();
        self.mock
            .expect_command("zmmailbox")
            .with_args(move |args| args.get(2) == Some(&owner))
            .returns_stderr(export_text)
            .returns_exit_code(export_code)
            .finish();

        let import_code = if script == AccountScript::ImportFails { 1 } else { 0 };
        let owner = archive.clone();
        self.mock
            .expect_command("zmmailbox")
            .with_args(move |args| args.get(2) == Some(&owner))
            .returns_stderr(if import_code == 0 { "" } else { "upload failed" })
            .returns_exit_code(import_code)
            .finish();

        if matches!(script, AccountScript::Complete | AccountScript::ImportFails) {
            self.write_export(account);
        }
    }

    /// Forwarding strip, membership query and recovery-account deletion
    /// succeed for every account.
    fn script_best_effort_steps(&mut self) {
        for subcommand in ["ma", "gam", "da"] {
            self.mock
                .expect_command("zmprov")
                .with_args(move |args| args.first().map(String::as_str) == Some(subcommand))
                .returns_success()
                .finish();
        }
    }

    /// Stand in for the export tool writing its archive. Cleanup removes
    /// every temporary file after each account, so only the first account of
    /// a run can rely on this.
    pub fn write_export(&self, account: &str) {
        let paths = WorkPaths::new(&self.work_dir(), "mailrecover-", account);
        let file = fs::File::create(paths.export_file).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let body = b"Subject: recovered\n\nbody";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "Inbox/0001-recovered.eml", &body[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    /// Number of recorded calls with `needle` as a substring of any argument.
    pub fn calls_mentioning(&self, needle: &str) -> usize {
        self.mock
            .get_call_history()
            .iter()
            .filter(|cmd| cmd.args.iter().any(|arg| arg.contains(needle)))
            .count()
    }

    pub fn deletions_of(&self, account: &str) -> usize {
        let recovery = format!("recover_{account}");
        self.mock.count_calls("zmprov", |args| {
            args.first().map(String::as_str) == Some("da") && args.get(1) == Some(&recovery)
        })
    }

    pub fn escalated_restores(&self) -> usize {
        self.mock
            .count_calls("zmrestore", |args| args.iter().any(|arg| arg == IGNORE_REPLAY_ERRORS))
    }

    /// Accounts in the order the pipeline first touched them.
    pub fn processing_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for cmd in self.mock.get_call_history() {
            if cmd.program == "zmprov" && cmd.args.first().map(String::as_str) == Some("ga") {
                order.push(cmd.args[1].clone());
            }
        }
        order
    }
}

/// Route INFO-level events of the current thread into `path`, the way the
/// binary writes its run log.
pub fn capture_run_log(path: &Path) -> tracing::subscriber::DefaultGuard {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// A clock that replays scripted times of day, repeating the last one.
pub struct SequenceClock {
    times: Mutex<VecDeque<NaiveTime>>,
}

impl SequenceClock {
    pub fn new(times: &[(u32, u32)]) -> Self {
        Self {
            times: Mutex::new(
                times
                    .iter()
                    .map(|&(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap())
                    .collect(),
            ),
        }
    }
}

impl Clock for SequenceClock {
    fn now(&self) -> NaiveTime {
        let mut times = self.times.lock().unwrap();
        if times.len() > 1 {
            times.pop_front().unwrap()
        } else {
            times.front().copied().unwrap()
        }
    }
}
