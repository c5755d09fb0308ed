//! Configuration file handling

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Config file read when no path is given (optional)
pub const DEFAULT_CONFIG_PATH: &str = "/etc/watchlog/config.toml";

/// Settings loaded from TOML; every key is optional
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding `{host}/{month}/watchguard.log`
    pub log_root: PathBuf,

    /// Optional `ip: name` mapping used to label addresses
    pub hosts_file: Option<PathBuf>,

    /// Lines fetched when no count is given
    pub default_lines: usize,

    /// Upper bound for requested line counts
    pub max_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_root: PathBuf::from("/var/log/watchguard"),
            hosts_file: None,
            default_lines: 2000,
            max_lines: 50_000,
        }
    }
}

impl Config {
    /// Load from an explicit path, or from [`DEFAULT_CONFIG_PATH`] if it
    /// exists. An explicit path that cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load(Some(default))
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.max_lines == 0 {
            anyhow::bail!("max_lines must be at least 1");
        }
        Ok(config)
    }

    /// Requested line count clamped to `[1, max_lines]`
    pub fn clamp_lines(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_lines)
            .clamp(1, self.max_lines)
    }
}
