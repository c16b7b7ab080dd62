use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// debinstall - Inspect and install local Debian packages
#[derive(Parser)]
#[command(name = "debinstall")]
#[command(about = "Validate, preflight and install a local .deb archive")]
#[command(version)]
pub struct Cli {
    /// Path to a JSON configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show package metadata, installed state and the preflight verdict
    Inspect {
        /// Package archive (path or file:// URL)
        archive: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Preflight the archive and install it if admissible
    Install {
        /// Package archive (path or file:// URL)
        archive: String,

        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        file: PathBuf,
    },
    /// Print the default configuration as JSON
    DefaultConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
