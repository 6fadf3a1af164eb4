//! Runtime configuration.

use crate::application::retry::RetryPolicy;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, loadable from a TOML file.
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backoff applied to every operation the driver submits
    pub retry: RetryPolicy,

    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// RocksDB directory. Unset means in-memory storage.
    pub db_path: Option<PathBuf>,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.retry = config.retry.clamped();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
