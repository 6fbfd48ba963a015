//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

/// Tuning knobs for a root store and everything scoped from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Name used in log records
    #[serde(default = "default_name")]
    pub name: String,

    /// Capacity of the state-change broadcast channel
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,

    /// Number of diagnostics retained for inspection
    #[serde(default = "default_diagnostic_history")]
    pub diagnostic_history: usize,

    /// Items a stream effect may emit synchronously during one drain
    /// before the rest of it is moved onto a runtime task
    #[serde(default = "default_max_sync_emissions")]
    pub max_sync_emissions: usize,

    /// Whether the root store caches derived scopes
    #[serde(default = "default_true")]
    pub cache_children: bool,
}

fn default_name() -> String {
    String::from("store")
}

fn default_change_buffer() -> usize {
    64
}

fn default_diagnostic_history() -> usize {
    128
}

fn default_max_sync_emissions() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            change_buffer: default_change_buffer(),
            diagnostic_history: default_diagnostic_history(),
            max_sync_emissions: default_max_sync_emissions(),
            cache_children: true,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_yaml::from_str(contents)?;
        Ok(config.normalized())
    }

    /// Same configuration under a different name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // Channel and buffer capacities must be non-zero.
    pub(crate) fn normalized(mut self) -> Self {
        self.change_buffer = self.change_buffer.max(1);
        self.diagnostic_history = self.diagnostic_history.max(1);
        self.max_sync_emissions = self.max_sync_emissions.max(1);
        self
    }
}
