//! The seam between the engine and the package-management toolchain.
//!
//! Everything that shells out to `dpkg` goes through [`PackageTool`], so the
//! controller, extractor and preflight checker can be driven by fakes.
//!
//! # Invariants
//!
//! - `inspect` and `trial_install` are non-mutating and bounded by the
//!   configured command timeout
//! - `spawn_install` is the only mutating operation; it returns immediately
//!   and reports progress through the returned channel

use crate::command::{CommandOutput, run_with_timeout};
use crate::config::InstallerConfig;
use crate::error::ToolError;
use crate::supervisor::{ProcessEvent, spawn_supervised};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::Receiver;
use std::time::Duration;
use tracing::info;

/// Operations the installer needs from the package toolchain.
pub trait PackageTool: Send + Sync {
    /// Print the archive's control information (`dpkg -I <archive>`).
    fn inspect(&self, archive: &Path) -> Result<CommandOutput, ToolError>;

    /// Simulate installing the archive (`dpkg --dry-run -i <archive>`).
    fn trial_install(&self, archive: &Path) -> Result<CommandOutput, ToolError>;

    /// Start the real, privileged install (`dpkg -i <archive>`).
    fn spawn_install(&self, archive: &Path) -> Result<Receiver<ProcessEvent>, ToolError>;
}

/// `dpkg` driven through the command line.
#[derive(Debug, Clone)]
pub struct Dpkg {
    program: PathBuf,
    elevation: Vec<String>,
    timeout: Duration,
}

impl Dpkg {
    pub fn new(program: impl Into<PathBuf>, elevation: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            elevation,
            timeout,
        }
    }

    pub fn from_config(config: &InstallerConfig) -> Self {
        Self::new(
            config.dpkg_path.clone(),
            config.elevation_command.clone(),
            config.command_timeout(),
        )
    }

    /// Arguments for the archive-inspection call.
    pub fn inspect_args(archive: &Path) -> Vec<OsString> {
        vec!["-I".into(), archive.into()]
    }

    /// Arguments for the non-mutating trial install.
    pub fn trial_args(archive: &Path) -> Vec<OsString> {
        vec!["--dry-run".into(), "-i".into(), archive.into()]
    }

    /// Arguments for the real install.
    pub fn install_args(archive: &Path) -> Vec<OsString> {
        vec!["-i".into(), archive.into()]
    }

    /// Build the install command, prefixed with the elevation helper unless
    /// we already run with an effective uid of 0.
    pub fn install_command(&self, archive: &Path) -> Command {
        self.install_command_for(archive, nix::unistd::geteuid().is_root())
    }

    fn install_command_for(&self, archive: &Path, is_root: bool) -> Command {
        match self.elevation.split_first() {
            Some((helper, helper_args)) if !is_root => {
                let mut cmd = Command::new(helper);
                cmd.args(helper_args)
                    .arg(&self.program)
                    .args(Self::install_args(archive));
                cmd
            }
            _ => {
                let mut cmd = Command::new(&self.program);
                cmd.args(Self::install_args(archive));
                cmd
            }
        }
    }
}

impl PackageTool for Dpkg {
    fn inspect(&self, archive: &Path) -> Result<CommandOutput, ToolError> {
        run_with_timeout(
            Command::new(&self.program).args(Self::inspect_args(archive)),
            self.timeout,
        )
    }

    fn trial_install(&self, archive: &Path) -> Result<CommandOutput, ToolError> {
        run_with_timeout(
            Command::new(&self.program).args(Self::trial_args(archive)),
            self.timeout,
        )
    }

    fn spawn_install(&self, archive: &Path) -> Result<Receiver<ProcessEvent>, ToolError> {
        let cmd = self.install_command(archive);
        info!(
            "Starting install: {} {:?}",
            cmd.get_program().to_string_lossy(),
            cmd.get_args().collect::<Vec<_>>()
        );
        spawn_supervised(cmd)
    }
}
