//! Pre-install admissibility checks
//!
//! Three checks run concurrently against one archive: dependency
//! satisfiability, conflicts with installed packages and system breakage.
//! Dependency and conflict detection both read the outcome of a single
//! non-destructive trial install, which runs at most once per evaluation.
//!
//! # Verdict rules
//!
//! - `can_install = dependencies_satisfied && !has_conflicts && !breaks_system`
//! - The message is the first populated one in the order
//!   dependencies, conflicts, breakage
//! - A rejected verdict without a message gets [`DEFAULT_REJECTION_MESSAGE`]
//! - A trial install that could not run (spawn error, timeout) rejects the
//!   dependency check; conflict detection stays permissive

use crate::command::CommandOutput;
use crate::error::ToolError;
use crate::tool::PackageTool;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

pub const UNMET_DEPENDENCIES_MESSAGE: &str = "Error: Unmet dependencies";
pub const CONFLICTS_MESSAGE: &str = "Error: Package conflicts";
pub const BREAKS_SYSTEM_MESSAGE: &str = "Error: Installation would break the system";
pub const DEFAULT_REJECTION_MESSAGE: &str = "Error: Cannot satisfy dependencies";

const DEPENDENCY_KEYWORDS: [&str; 3] = ["depends", "dependency", "dependencies"];
const CONFLICT_KEYWORD: &str = "conflict";

/// How to read a failed trial install whose output names no dependency problem.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DependencyPolicy {
    /// Treat unexplained failures as satisfied dependencies
    #[default]
    Lenient,
    /// Treat any failed trial install that names no conflict as unmet dependencies
    Strict,
}

/// Why an archive was judged not installable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RejectionReason {
    UnmetDependencies,
    Conflicts,
    BreaksSystem,
    ToolFailure,
}

/// Combined result of the preflight checks for one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissibilityVerdict {
    pub can_install: bool,
    pub message: Option<String>,
    pub reason: Option<RejectionReason>,
}

impl AdmissibilityVerdict {
    pub fn admissible() -> Self {
        Self {
            can_install: true,
            message: None,
            reason: None,
        }
    }

    pub fn rejected(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            can_install: false,
            message: Some(message.into()),
            reason: Some(reason),
        }
    }

    /// Message text, empty when admissible
    pub fn message_text(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// Result of one individual check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: Option<String>,
    pub reason: Option<RejectionReason>,
}

impl CheckOutcome {
    fn pass() -> Self {
        Self {
            passed: true,
            message: None,
            reason: None,
        }
    }

    fn fail(reason: RejectionReason, message: Option<&str>) -> Self {
        Self {
            passed: false,
            message: message.map(str::to_string),
            reason: Some(reason),
        }
    }
}

/// Outcome of the shared trial install.
pub type TrialOutcome = Result<CommandOutput, ToolError>;

fn mentions_any(text: &str, keywords: &[&str]) -> bool {
    let lowered = text.to_lowercase();
    keywords.iter().any(|kw| lowered.contains(kw))
}

/// Decide dependency satisfiability from the trial install.
pub fn check_dependencies(trial: &TrialOutcome, policy: DependencyPolicy) -> CheckOutcome {
    match trial {
        Ok(output) if output.success => CheckOutcome::pass(),
        Ok(output) => {
            let text = output.combined();
            if mentions_any(&text, &DEPENDENCY_KEYWORDS) {
                return CheckOutcome::fail(
                    RejectionReason::UnmetDependencies,
                    Some(UNMET_DEPENDENCIES_MESSAGE),
                );
            }
            // Conflict-only failures belong to the conflict check
            if mentions_any(&text, &[CONFLICT_KEYWORD]) {
                return CheckOutcome::pass();
            }
            match policy {
                DependencyPolicy::Lenient => {
                    debug!("Trial install failed without dependency diagnostics; accepting");
                    CheckOutcome::pass()
                }
                DependencyPolicy::Strict => CheckOutcome::fail(
                    RejectionReason::UnmetDependencies,
                    Some(UNMET_DEPENDENCIES_MESSAGE),
                ),
            }
        }
        Err(e) => {
            warn!("Dependency check could not run: {}", e);
            CheckOutcome::fail(RejectionReason::ToolFailure, None)
        }
    }
}

/// Decide whether the archive conflicts with installed packages.
pub fn check_conflicts(trial: &TrialOutcome) -> CheckOutcome {
    match trial {
        Ok(output) if !output.success && mentions_any(&output.combined(), &[CONFLICT_KEYWORD]) => {
            CheckOutcome::fail(RejectionReason::Conflicts, Some(CONFLICTS_MESSAGE))
        }
        Ok(_) => CheckOutcome::pass(),
        Err(e) => {
            debug!("Conflict check has no trial output ({}); assuming none", e);
            CheckOutcome::pass()
        }
    }
}

/// System-breakage detection.
///
/// Always passes: nothing inspects removals or essential packages yet.
pub fn check_system_breakage(_archive: &Path) -> CheckOutcome {
    CheckOutcome::pass()
}

/// Fold the three check outcomes into one verdict.
pub fn combine(
    dependencies: CheckOutcome,
    conflicts: CheckOutcome,
    breakage: CheckOutcome,
) -> AdmissibilityVerdict {
    let checks = [dependencies, conflicts, breakage];
    if checks.iter().all(|c| c.passed) {
        return AdmissibilityVerdict::admissible();
    }

    let message = checks
        .iter()
        .filter(|c| !c.passed)
        .find_map(|c| c.message.clone())
        .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string());
    let reason = checks.iter().filter(|c| !c.passed).find_map(|c| c.reason);

    AdmissibilityVerdict {
        can_install: false,
        message: Some(message),
        reason,
    }
}

/// Runs the preflight checks for archives.
#[derive(Clone)]
pub struct PreflightChecker {
    tool: Arc<dyn PackageTool>,
    policy: DependencyPolicy,
}

impl PreflightChecker {
    pub fn new(tool: Arc<dyn PackageTool>, policy: DependencyPolicy) -> Self {
        Self { tool, policy }
    }

    pub fn policy(&self) -> DependencyPolicy {
        self.policy
    }

    /// Run all checks on the current thread and return the verdict.
    pub fn evaluate(&self, archive: &Path) -> AdmissibilityVerdict {
        let trial: OnceLock<TrialOutcome> = OnceLock::new();
        let run_trial = || trial.get_or_init(|| self.tool.trial_install(archive));
        let policy = self.policy;

        let (dependencies, conflicts, breakage) = thread::scope(|s| {
            let deps = s.spawn(|| check_dependencies(run_trial(), policy));
            let conflicts = s.spawn(|| check_conflicts(run_trial()));
            let breakage = s.spawn(|| check_system_breakage(archive));

            (
                deps.join().unwrap_or_else(|_| panicked_check()),
                conflicts.join().unwrap_or_else(|_| panicked_check()),
                breakage.join().unwrap_or_else(|_| panicked_check()),
            )
        });

        let verdict = combine(dependencies, conflicts, breakage);
        info!(
            "Preflight for {}: can_install={} {}",
            archive.display(),
            verdict.can_install,
            verdict.message_text()
        );
        verdict
    }

    /// Start the checks on a background thread.
    pub fn check(&self, archive: &Path) -> PreflightHandle {
        let (tx, rx) = mpsc::channel();
        let checker = self.clone();
        let path = archive.to_path_buf();
        let worker_path = path.clone();

        thread::spawn(move || {
            let verdict = checker.evaluate(&worker_path);
            // Receiver gone means the selection was dropped
            let _ = tx.send(verdict);
        });

        PreflightHandle { archive: path, rx }
    }
}

fn panicked_check() -> CheckOutcome {
    warn!("Preflight check thread panicked");
    CheckOutcome::fail(RejectionReason::ToolFailure, None)
}

/// Pending result of a background preflight.
#[derive(Debug)]
pub struct PreflightHandle {
    archive: PathBuf,
    rx: Receiver<AdmissibilityVerdict>,
}

impl PreflightHandle {
    /// Archive the check was started for
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Non-blocking poll. Yields the verdict once; a worker that died
    /// without reporting yields a tool-failure rejection.
    pub fn try_result(&self) -> Option<AdmissibilityVerdict> {
        match self.rx.try_recv() {
            Ok(verdict) => Some(verdict),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(lost_worker_verdict()),
        }
    }

    /// Block up to `timeout` for the verdict.
    pub fn wait(&self, timeout: Duration) -> Option<AdmissibilityVerdict> {
        match self.rx.recv_timeout(timeout) {
            Ok(verdict) => Some(verdict),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(lost_worker_verdict()),
        }
    }
}

fn lost_worker_verdict() -> AdmissibilityVerdict {
    AdmissibilityVerdict::rejected(RejectionReason::ToolFailure, DEFAULT_REJECTION_MESSAGE)
}
