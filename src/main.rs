//! debinstall - Main entry point
//!
//! Thin command-line front end over [`PackageInstallController`].

use anyhow::{Context, Result};
use debinstall::cli::{Cli, Commands};
use debinstall::config::InstallerConfig;
use debinstall::controller::{ControllerSnapshot, PackageInstallController};
use debinstall::notify::Notification;
use debinstall::process_guard;
use debinstall::session::SessionState;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Initialize the logger with appropriate settings
fn init_logger() {
    // RUST_LOG overrides the default level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

fn main() {
    init_logger();
    debug!("debinstall starting up");

    // Refuse to leave a running dpkg behind on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    let cli = Cli::parse_args();

    let outcome = match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::DefaultConfig => print_default_config(),
        Commands::Inspect { archive, json } => {
            load_config(cli.config.as_deref()).and_then(|config| inspect(&config, &archive, json))
        }
        Commands::Install { archive, json } => {
            load_config(cli.config.as_deref()).and_then(|config| install(&config, &archive, json))
        }
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<InstallerConfig> {
    if let Some(path) = path {
        info!("Using configuration file: {:?}", path);
    }
    InstallerConfig::load_or_default(path).context("Invalid configuration")
}

fn validate(file: &Path) -> Result<bool> {
    info!("Validating configuration file: {:?}", file);
    let config = InstallerConfig::load_from_file(file)?;
    match config.validate() {
        Ok(()) => {
            println!("✓ Configuration file is valid: {:?}", file);
            Ok(true)
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed: {}", e);
            Ok(false)
        }
    }
}

fn print_default_config() -> Result<bool> {
    let json = serde_json::to_string_pretty(&InstallerConfig::default())
        .context("Failed to serialize default configuration")?;
    println!("{}", json);
    Ok(true)
}

/// Select the archive and wait for its preflight verdict.
fn prepare(config: &InstallerConfig, archive: &str) -> Result<PackageInstallController> {
    let mut controller = PackageInstallController::new(config);
    controller.set_archive(archive);

    // The trial install is bounded by the command timeout; allow some slack on top
    let budget = config.command_timeout() + Duration::from_secs(5);
    if !controller.wait_for_preflight(budget) {
        anyhow::bail!("Preflight check did not finish within {}s", budget.as_secs());
    }
    Ok(controller)
}

fn inspect(config: &InstallerConfig, archive: &str, json: bool) -> Result<bool> {
    let snapshot = prepare(config, archive)?.snapshot();
    if json {
        print_json(&snapshot)?;
    } else {
        print_report(&snapshot);
    }
    Ok(snapshot.valid && snapshot.can_install)
}

fn install(config: &InstallerConfig, archive: &str, json: bool) -> Result<bool> {
    let mut controller = prepare(config, archive)?;
    let before = controller.snapshot();
    if !json {
        print_report(&before);
    }
    let notifications = controller.subscribe();
    if !controller.install() {
        if json {
            print_json(&before)?;
        }
        return Ok(false);
    }

    let state = loop {
        controller.poll_events();
        if !json {
            for notification in notifications.try_iter() {
                if let Notification::LogAppended(text) = notification {
                    print!("{}", text);
                }
            }
        }
        let state = controller.snapshot().session_state;
        if state != SessionState::Running {
            break state;
        }
        thread::sleep(LOG_POLL_INTERVAL);
    };

    let after = controller.snapshot();
    if json {
        print_json(&after)?;
    } else {
        println!();
        println!("{}", after.status_message);
    }
    Ok(state == SessionState::Succeeded)
}

fn print_json(snapshot: &ControllerSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialize state")?;
    println!("{}", json);
    Ok(())
}

fn print_report(snapshot: &ControllerSnapshot) {
    if let Some(archive) = &snapshot.archive {
        println!("Archive:        {}", archive.display());
    }
    if let Some(meta) = &snapshot.metadata {
        println!("Package:        {}", meta.name);
        println!("Version:        {}", meta.version);
        println!("Maintainer:     {}", meta.maintainer);
        println!("Description:    {}", meta.description);
        if let Some(homepage) = &meta.homepage {
            println!("Homepage:       {}", homepage);
        }
    }
    if let Some(size) = &snapshot.installed_size {
        println!("Installed size: {}", size);
    }
    match (snapshot.installed.installed, &snapshot.installed.version) {
        (true, Some(version)) => println!("Installed:      yes ({})", version),
        (true, None) => println!("Installed:      yes"),
        (false, _) => println!("Installed:      no"),
    }
    if snapshot.can_install {
        println!("✓ Ready to install");
    } else {
        println!("✗ {}", snapshot.pre_install_message);
    }
}
