//! External tool configuration.
//!
//! Program names, backup locations and naming conventions for the
//! collaborating recovery tools. Loaded from TOML; every field has a default
//! so an empty file (or no file at all) yields a usable configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RecoveryError, Result};

/// Environment variable naming an explicit tool configuration file.
pub const CONFIG_ENV_VAR: &str = "MAILRECOVER_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub zmprov: String,
    pub zmrestore: String,
    pub zmmailbox: String,

    /// Backup set location handed to the restore tool.
    pub backup_target: String,
    /// Point in time the mailbox is restored to, passed through verbatim.
    pub restore_to_time: String,
    /// Export window, `MM/DD/YYYY` dates understood by the mailbox search.
    pub export_after: String,
    pub export_before: String,

    /// Prefix the restore tool puts in front of the recovery account name.
    pub recovery_prefix: String,
    /// Extra prefix for the target archive account when restored-prefix mode is on.
    pub restored_prefix: String,
    /// Accounts starting with one of these are system accounts, never recovered.
    pub reserved_prefixes: Vec<String>,
    /// Accounts ending with this are archive accounts, never recovered.
    pub archive_suffix: String,
    pub forwarding_attribute: String,

    pub work_dir: PathBuf,
    /// Every temporary artifact in `work_dir` starts with this prefix.
    pub temp_prefix: String,
    pub message_extension: String,
    pub subfolder_label: String,

    pub mailer: String,
    pub mail_recipients: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            zmprov: "zmprov".to_string(),
            zmrestore: "zmrestore".to_string(),
            zmmailbox: "zmmailbox".to_string(),
            backup_target: "/opt/zimbra/backup".to_string(),
            restore_to_time: "20200101000000".to_string(),
            export_after: "01/01/2019".to_string(),
            export_before: "01/01/2020".to_string(),
            recovery_prefix: "recover_".to_string(),
            restored_prefix: "restored-".to_string(),
            reserved_prefixes: vec![
                "galsync".to_string(),
                "spam.".to_string(),
                "ham.".to_string(),
                "virus-quarantine.".to_string(),
            ],
            archive_suffix: ".archive".to_string(),
            forwarding_attribute: "zimbraPrefMailForwardingAddress".to_string(),
            work_dir: std::env::temp_dir(),
            temp_prefix: "mailrecover-".to_string(),
            message_extension: "eml".to_string(),
            subfolder_label: "Recovered".to_string(),
            mailer: "mail".to_string(),
            mail_recipients: Vec::new(),
        }
    }
}

impl ToolsConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|source| RecoveryError::Toml {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load from an explicit path, the environment, or the platform config
    /// directory, falling back to defaults when no file is configured.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
        let path = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => {
                    tracing::debug!("No tool configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        tracing::debug!("Loading tool configuration from {}", path.display());
        let contents =
            std::fs::read_to_string(&path).map_err(|source| RecoveryError::UnreadableFile {
                path: path.clone(),
                source,
            })?;
        Self::from_toml_str(&contents, &path)
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "mailrecover", "mailrecover")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
