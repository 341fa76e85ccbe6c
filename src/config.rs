//! Configuration for the tracker core.
//!
//! Settings live in `.secretary/config.yaml` under the tracked directory.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file path relative to the tracked directory.
pub const CONFIG_FILE_PATH: &str = ".secretary/config.yaml";

/// Database file path relative to the tracked directory.
pub const DATABASE_FILE_PATH: &str = ".secretary/secretary.sqlite3";

/// Log directory relative to the tracked directory.
pub const LOG_DIR_PATH: &str = ".secretary/logs";

fn default_inbox_name() -> String {
    "inbox".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretaryConfig {
    /// Name of the well-known root-level project that receives rollover
    /// clones of expired projects.
    #[serde(default = "default_inbox_name")]
    pub inbox_project_name: String,

    /// Log level for the file logger.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SecretaryConfig {
    fn default() -> Self {
        Self { inbox_project_name: default_inbox_name(), log_level: default_log_level() }
    }
}

impl SecretaryConfig {
    /// Load config from a tracked directory, returning defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(base_dir: &Path) -> Result<Self> {
        let config_path = base_dir.join(CONFIG_FILE_PATH);
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save config under a tracked directory, creating parents as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, base_dir: &Path) -> Result<()> {
        let config_path = base_dir.join(CONFIG_FILE_PATH);
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Get the config file path for a tracked directory.
    #[must_use]
    pub fn config_path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE_PATH)
    }

    /// Get the database file path for a tracked directory.
    #[must_use]
    pub fn database_path(base_dir: &Path) -> PathBuf {
        base_dir.join(DATABASE_FILE_PATH)
    }

    /// Get the log directory for a tracked directory.
    #[must_use]
    pub fn log_path(base_dir: &Path) -> PathBuf {
        base_dir.join(LOG_DIR_PATH)
    }
}
