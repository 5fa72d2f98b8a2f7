// Configuration — optional JSON file, overridden by command-line flags

use anyhow::{Context, Result};
use onionrelay_core::{CircuitParams, RelayConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.json";

/// Client-side settings that do not depend on the destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub max_attempts: u32,
    pub params: CircuitParams,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            params: CircuitParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Shared directory root; the platform data dir when unset
    pub directory_path: Option<PathBuf>,
    pub relay: RelayConfig,
    pub client: ClientSettings,
}

impl Config {
    /// Default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("onionrelay");
        Ok(dir)
    }

    /// Default data directory
    pub fn data_dir() -> Result<PathBuf> {
        let dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("onionrelay");
        Ok(dir)
    }

    /// Load `path`, or the default config file if it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = Self::config_dir()?.join(CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Directory root, falling back to `<data dir>/directory`
    pub fn directory_root(&self) -> Result<PathBuf> {
        match &self.directory_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("directory")),
        }
    }
}
