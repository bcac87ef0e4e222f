use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Environment variable overriding the configured git executable.
pub const GIT_BIN_ENV: &str = "GIT_PENDING_GIT";

const DEFAULT_POLL_INTERVAL_MS: u64 = 20;

/// Client configuration, usually read from a JSON file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Explicit path to the git executable. Searched on `PATH` when absent.
    pub git_bin: Option<PathBuf>,
    /// How often the supervisor checks a running process for exit.
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            git_bin: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Config {
    /// Loads configuration from an optional JSON file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON
    #[instrument]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_json(&content)?
            }
            None => Self::default(),
        };
        if let Some(git_bin) = std::env::var_os(GIT_BIN_ENV) {
            debug!(git_bin = ?git_bin, "Git executable overridden by environment");
            config.git_bin = Some(PathBuf::from(git_bin));
        }
        Ok(config)
    }

    /// Parses configuration from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        if config.poll_interval_ms == 0 {
            return Err(Error::ConfigError(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolves the git executable to invoke.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GitNotFound`] if the configured path does not exist or
    /// no git executable is present on `PATH`
    pub fn resolve_git_bin(&self) -> Result<PathBuf> {
        if let Some(git_bin) = &self.git_bin {
            if git_bin.is_file() {
                return Ok(git_bin.clone());
            }
            return Err(Error::GitNotFound(git_bin.display().to_string()));
        }
        let search_path = std::env::var_os("PATH").unwrap_or_default();
        find_in_path(git_file_name(), &search_path)
            .ok_or_else(|| Error::GitNotFound("no git executable on PATH".to_string()))
    }
}

const fn git_file_name() -> &'static str {
    if cfg!(windows) {
        "git.exe"
    } else {
        "git"
    }
}

fn find_in_path(file_name: &str, search_path: &std::ffi::OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}
