//! Account resolution: builds the ordered candidate list once per run.

use std::path::Path;
use tracing::{debug, info};

use crate::config::{AccountSource, ToolsConfig};
use crate::error::{RecoveryError, Result};
use crate::subprocess::{SubprocessManager, ZimbraCommands};

/// Produce the ordered accounts to consider, with system and archive
/// pseudo-accounts removed.
pub async fn resolve(
    source: &AccountSource,
    tools: &ToolsConfig,
    subprocess: &SubprocessManager,
) -> Result<Vec<String>> {
    let candidates = match source {
        AccountSource::Single(account) => vec![account.trim().to_string()],
        AccountSource::ListFile(path) => read_list_file(path)?,
        AccountSource::Directory => list_directory(tools, subprocess).await?,
    };

    let total = candidates.len();
    let accounts = filter_pseudo_accounts(candidates, tools);
    info!(
        "Resolved {} account(s), {} system or archive account(s) filtered",
        accounts.len(),
        total - accounts.len()
    );
    Ok(accounts)
}

fn read_list_file(path: &Path) -> Result<Vec<String>> {
    let contents =
        std::fs::read_to_string(path).map_err(|source| RecoveryError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(non_empty_lines(&contents))
}

async fn list_directory(
    tools: &ToolsConfig,
    subprocess: &SubprocessManager,
) -> Result<Vec<String>> {
    let output = subprocess
        .query(ZimbraCommands::new(tools).list_accounts())
        .await
        .map_err(|err| RecoveryError::Listing(err.to_string()))?;
    if !output.status.success() {
        return Err(RecoveryError::Listing(output.combined_text()));
    }

    let mut accounts = non_empty_lines(&output.stdout);
    accounts.sort();
    Ok(accounts)
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop accounts with a reserved internal prefix or the archive suffix.
pub fn filter_pseudo_accounts(accounts: Vec<String>, tools: &ToolsConfig) -> Vec<String> {
    accounts
        .into_iter()
        .filter(|account| {
            let reserved = tools
                .reserved_prefixes
                .iter()
                .any(|prefix| account.starts_with(prefix.as_str()));
            let archive =
                !tools.archive_suffix.is_empty() && account.ends_with(&tools.archive_suffix);
            if reserved || archive {
                debug!("Skipping pseudo-account {}", account);
            }
            !reserved && !archive
        })
        .collect()
}
