//! Command vectors for the mail-server administration tools, and parsers
//! for the little of their output the pipeline reads.

use std::path::Path;

use super::builder::ProcessCommandBuilder;
use super::runner::ProcessCommand;
use crate::config::ToolsConfig;

/// Modifier that makes the restore tool skip redo-log replay errors.
pub const IGNORE_REPLAY_ERRORS: &str = "--ignoreRedoErrors";

const ARCHIVE_ATTRIBUTE: &str = "zimbraArchiveAccount";

/// Builds the argument vectors for every external call the run makes.
#[derive(Debug, Clone)]
pub struct ZimbraCommands<'a> {
    tools: &'a ToolsConfig,
}

impl<'a> ZimbraCommands<'a> {
    pub fn new(tools: &'a ToolsConfig) -> Self {
        Self { tools }
    }

    /// Name of the temporary account the restore tool creates for `account`.
    pub fn recovery_account(&self, account: &str) -> String {
        format!("{}{}", self.tools.recovery_prefix, account)
    }

    pub fn list_accounts(&self) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmprov)
            .args(["-l", "gaa"])
            .build()
    }

    pub fn archive_account(&self, account: &str) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmprov)
            .args(["ga", account, ARCHIVE_ATTRIBUTE])
            .build()
    }

    pub fn restore(&self, account: &str, ignore_replay_errors: bool) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmrestore)
            .args(["-a", account])
            .args(["-t", &self.tools.backup_target])
            .args(["-restoreToTime", &self.tools.restore_to_time])
            .arg("-ca")
            .args(["-pre", &self.tools.recovery_prefix])
            .arg_if(ignore_replay_errors, IGNORE_REPLAY_ERRORS)
            .build()
    }

    pub fn clear_forwarding(&self, recovery: &str) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmprov)
            .args(["ma", recovery, &self.tools.forwarding_attribute, ""])
            .build()
    }

    pub fn memberships(&self, recovery: &str) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmprov)
            .args(["gam", recovery])
            .build()
    }

    pub fn remove_membership(&self, list: &str, recovery: &str) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmprov)
            .args(["rdlm", list, recovery])
            .build()
    }

    pub fn export(&self, recovery: &str, destination: &Path) -> ProcessCommand {
        let query = format!(
            "after:{} before:{}",
            self.tools.export_after, self.tools.export_before
        );
        let url = format!("//?fmt=tgz&query={}", encode(&query));
        ProcessCommandBuilder::new(&self.tools.zmmailbox)
            .args(["-z", "-m", recovery, "getRestURL", "-o"])
            .arg(&destination.to_string_lossy())
            .arg(&url)
            .build()
    }

    pub fn import(&self, archive: &str, payload: &Path) -> ProcessCommand {
        let url = format!(
            "//?fmt=tgz&resolve=skip&subfolder={}",
            encode(&self.tools.subfolder_label)
        );
        ProcessCommandBuilder::new(&self.tools.zmmailbox)
            .args(["-z", "-m", archive, "postRestURL", &url])
            .arg(&payload.to_string_lossy())
            .build()
    }

    pub fn delete_account(&self, recovery: &str) -> ProcessCommand {
        ProcessCommandBuilder::new(&self.tools.zmprov)
            .args(["da", recovery])
            .build()
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Extract the archive account from `zmprov ga <account> zimbraArchiveAccount`
/// output. `None` when the attribute is absent or empty.
pub fn parse_archive_account(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix(ARCHIVE_ATTRIBUTE))
        .filter_map(|rest| rest.strip_prefix(':'))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Direct list memberships from `zmprov gam` output. Indirect memberships
/// (`list (via other)`) disappear with the direct ones and are skipped.
pub fn parse_memberships(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.contains("(via "))
        .map(str::to_string)
        .collect()
}
