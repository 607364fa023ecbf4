//! Storage configuration, loadable from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};
use super::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

/// Where the database lives and how it is cut into blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataBaseConfig {
    /// Backing file, created on first open.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Size of every block in bytes. Fixed for the lifetime of the file.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_path() -> PathBuf {
    PathBuf::from("./data/surikov.db")
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            block_size: default_block_size(),
        }
    }
}

impl DataBaseConfig {
    pub fn new(path: impl Into<PathBuf>, block_size: usize) -> Self {
        Self {
            path: path.into(),
            block_size,
        }
    }

    /// Loads a config file; missing fields fall back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| Error::ConfigError(format!("failed to read {}: {err}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|err| Error::ConfigError(format!("failed to parse {}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(Error::InvalidBlockSizeConfig {
                block_size: self.block_size,
                min: MIN_BLOCK_SIZE,
                max: MAX_BLOCK_SIZE,
            });
        }
        Ok(())
    }
}
