// config.rs — Change set behavior configuration.
//
// Example `.changeset/config.toml`:
//
//   # What remove_elements does with indices past the end: "ignore" or "reject".
//   invalid_index = "reject"

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Location of the config file relative to a project root.
pub const CONFIG_FILE: &str = ".changeset/config.toml";

/// Policy for out-of-range indices passed to `remove_elements`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvalidIndexPolicy {
    /// Skip bad indices with a warning; valid ones are still removed.
    #[default]
    Ignore,
    /// Fail the whole call before anything is removed.
    Reject,
}

/// Tunables for a [`ChangeSet`](crate::ChangeSet).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSetConfig {
    #[serde(default)]
    pub invalid_index: InvalidIndexPolicy,
}

impl ChangeSetConfig {
    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `.changeset/config.toml` under `project_root`.
    pub fn load_from_project<P: AsRef<Path>>(project_root: P) -> Result<Self, ConfigError> {
        Self::load(project_root.as_ref().join(CONFIG_FILE))
    }
}
