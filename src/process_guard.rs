//! Lifecycle management for install child processes
//!
//! `dpkg -i` must never be interrupted halfway: a killed unpack leaves the
//! package database with half-installed entries that need manual repair.
//!
//! # Approach
//! - Install children run in their own process group, so a Ctrl+C in the
//!   controlling terminal is not delivered to them
//! - Every live install child is tracked in a global registry
//! - On SIGINT/SIGTERM/SIGHUP the parent waits for tracked children to exit
//!   before it exits itself

use nix::sys::signal;
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// How often shutdown re-checks whether tracked children are gone
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Registry tracking live install child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Register a freshly spawned child
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered install child PID {}", pid);
    }

    /// Unregister a child after it has been reaped
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered install child PID {}", pid);
    }

    /// Number of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Tracked children that are still running
    pub fn live_pids(&self) -> Vec<u32> {
        self.pids
            .iter()
            .copied()
            .filter(|&pid| is_process_alive(pid))
            .collect()
    }

    /// Forget children that are no longer alive, returning how many remain
    pub fn prune(&mut self) -> usize {
        self.pids.retain(|&pid| is_process_alive(pid));
        self.pids.len()
    }
}

/// Register `pid` with the global registry.
pub fn track_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.register(pid);
    }
}

/// Remove `pid` from the global registry.
pub fn untrack_child(pid: u32) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }
}

/// Block until every tracked install child has exited.
pub fn wait_for_tracked_children() {
    let registry = ChildRegistry::global();
    loop {
        let remaining = match registry.lock() {
            Ok(mut guard) => guard.prune(),
            Err(_) => return,
        };
        if remaining == 0 {
            return;
        }
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }
}

/// Check if a process is still alive (not dead or zombie)
pub(crate) fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if signal::kill(Pid::from_raw(raw), None).is_err() {
        return false;
    }

    // Third field of /proc/<pid>/stat is the state letter
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
        {
            return !matches!(state, "Z" | "X");
        }
    }

    true
}

/// Install signal handlers that refuse to abandon a running install.
///
/// Call once at program start. On SIGINT, SIGTERM or SIGHUP the handler
/// thread waits for tracked install children, then exits with 128 + signal.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            let live = ChildRegistry::global()
                .lock()
                .map(|r| r.live_pids())
                .unwrap_or_default();

            if live.is_empty() {
                info!("Received {}, exiting", signal_name);
            } else {
                warn!(
                    "Received {} while dpkg is running (PIDs {:?}); waiting for it to finish",
                    signal_name, live
                );
                wait_for_tracked_children();
                info!("Install child finished, exiting");
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as the leader of a new process group
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid is async-signal-safe and touches no parent state
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::from)?;
                Ok(())
            });
        }
        self
    }
}
