//! Installer configuration
//!
//! Loaded from a JSON file. Every field has a default, so an empty object
//! (or no file at all) yields a working setup for a stock Debian system.

use crate::preflight::DependencyPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings for the install engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Path or name of the dpkg binary
    pub dpkg_path: PathBuf,
    /// Command prefix used to gain root for the real install (e.g. pkexec)
    pub elevation_command: Vec<String>,
    /// Upper bound for every diagnostic command (inspection, trial install)
    pub command_timeout_secs: u64,
    /// dpkg status database consulted for installed state
    pub status_database: PathBuf,
    /// How to read trial-install failures without recognizable diagnostics
    pub dependency_policy: DependencyPolicy,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            dpkg_path: PathBuf::from("dpkg"),
            elevation_command: vec!["pkexec".to_string()],
            command_timeout_secs: 5,
            status_database: PathBuf::from("/var/lib/dpkg/status"),
            dependency_policy: DependencyPolicy::Lenient,
        }
    }
}

impl InstallerConfig {
    /// Diagnostic command timeout as a `Duration`
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults; validates either way.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.dpkg_path.as_os_str().is_empty() {
            anyhow::bail!("dpkg_path must not be empty");
        }

        if self.command_timeout_secs == 0 {
            anyhow::bail!("command_timeout_secs must be greater than zero");
        }

        if self.elevation_command.iter().any(|arg| arg.trim().is_empty()) {
            anyhow::bail!("elevation_command must not contain empty arguments");
        }

        if self.status_database.as_os_str().is_empty() {
            anyhow::bail!("status_database must not be empty");
        }

        Ok(())
    }
}
