//! Package install controller
//!
//! The façade a front end talks to. It owns the current archive selection
//! (metadata, installed state, admissibility verdict) and the install
//! session, and publishes every change as a [`Notification`].
//!
//! # Threading
//!
//! All state lives on the thread that owns the controller. Preflight checks
//! and the install child report back over channels; their results are only
//! applied inside [`PackageInstallController::poll_events`]. Each preflight
//! is tagged with the selection generation it was started for, and results
//! for an older selection are dropped on arrival.

use crate::config::InstallerConfig;
use crate::error::ExtractError;
use crate::installed::{DpkgStatusDatabase, InstalledState, InstalledStateQuery, PackageDatabase};
use crate::metadata::{PackageMetadata, PackageMetadataExtractor};
use crate::mime::{MagicClassifier, MimeClassifier};
use crate::notify::{Field, Notification, Notifier};
use crate::preflight::{
    AdmissibilityVerdict, DependencyPolicy, PreflightChecker, PreflightHandle, RejectionReason,
};
use crate::session::{InstallSession, SessionState};
use crate::tool::{Dpkg, PackageTool};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const NOT_A_PACKAGE_MESSAGE: &str = "Error: Not a valid Debian package";
pub const INVALID_PACKAGE_MESSAGE: &str = "Error: Invalid or corrupted package";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything a front end can read, captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub archive: Option<PathBuf>,
    pub metadata: Option<PackageMetadata>,
    /// Installed size with binary units
    pub installed_size: Option<String>,
    pub installed: InstalledState,
    pub valid: bool,
    pub can_install: bool,
    pub pre_install_message: String,
    pub rejection_reason: Option<RejectionReason>,
    pub preflight_pending: bool,
    pub session_state: SessionState,
    pub status_message: String,
    pub status_details: String,
}

impl ControllerSnapshot {
    pub fn is_installed(&self) -> bool {
        self.installed.installed
    }
}

/// Derived state of the selected archive; replaced as a whole on reselection.
#[derive(Debug, Clone, Default)]
struct Selection {
    archive: Option<PathBuf>,
    metadata: Option<PackageMetadata>,
    installed: InstalledState,
    valid: bool,
    verdict: Option<AdmissibilityVerdict>,
    pre_install_message: String,
}

impl Selection {
    fn can_install(&self) -> bool {
        self.verdict.as_ref().is_some_and(|v| v.can_install)
    }

    fn changed_fields(&self, next: &Self) -> Vec<Field> {
        let mut fields = Vec::new();
        if self.archive != next.archive {
            fields.push(Field::ArchivePath);
        }
        if self.metadata != next.metadata {
            fields.push(Field::Metadata);
        }
        if self.installed != next.installed {
            fields.push(Field::InstalledState);
        }
        if self.valid != next.valid {
            fields.push(Field::Valid);
        }
        if self.can_install() != next.can_install() {
            fields.push(Field::CanInstall);
        }
        if self.pre_install_message != next.pre_install_message {
            fields.push(Field::PreInstallMessage);
        }
        fields
    }
}

#[derive(Debug)]
struct PendingPreflight {
    generation: u64,
    handle: PreflightHandle,
}

/// Orchestrates validation, preflight and installation of one archive at a time.
pub struct PackageInstallController {
    tool: Arc<dyn PackageTool>,
    extractor: PackageMetadataExtractor,
    checker: PreflightChecker,
    installed: InstalledStateQuery,
    session: InstallSession,
    notifier: Notifier,
    selection: Selection,
    generation: u64,
    pending: Vec<PendingPreflight>,
}

impl PackageInstallController {
    /// Controller backed by the real dpkg toolchain.
    pub fn new(config: &InstallerConfig) -> Self {
        Self::with_parts(
            Arc::new(Dpkg::from_config(config)),
            Arc::new(MagicClassifier),
            Box::new(DpkgStatusDatabase::new(config.status_database.clone())),
            config.dependency_policy,
        )
    }

    /// Controller over explicit collaborators.
    pub fn with_parts(
        tool: Arc<dyn PackageTool>,
        classifier: Arc<dyn MimeClassifier>,
        database: Box<dyn PackageDatabase>,
        policy: DependencyPolicy,
    ) -> Self {
        Self {
            extractor: PackageMetadataExtractor::new(tool.clone(), classifier),
            checker: PreflightChecker::new(tool.clone(), policy),
            tool,
            installed: InstalledStateQuery::new(database),
            session: InstallSession::new(),
            notifier: Notifier::new(),
            selection: Selection::default(),
            generation: 0,
            pending: Vec::new(),
        }
    }

    /// Receive every future notification.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Select the archive to work on.
    ///
    /// Accepts plain paths and `file://` URLs. Empty input, the current
    /// selection and any call while an install runs are ignored. Metadata
    /// extraction and the installed-state lookup run before this returns;
    /// the preflight check continues in the background.
    pub fn set_archive(&mut self, input: &str) {
        if self.session.is_running() {
            warn!("Ignoring new archive {:?}: an installation is running", input);
            return;
        }
        let Some(path) = normalize_archive_path(input) else {
            debug!("Ignoring empty or unresolvable archive path {:?}", input);
            return;
        };
        if self.selection.archive.as_deref() == Some(path.as_path()) {
            debug!("{} is already selected", path.display());
            return;
        }

        self.generation += 1;
        info!("Selected {} (selection {})", path.display(), self.generation);

        let mut next = Selection {
            archive: Some(path.clone()),
            ..Selection::default()
        };
        match self.extractor.extract(&path) {
            Ok(metadata) => {
                next.installed = self.installed.query(&metadata.name);
                next.metadata = Some(metadata);
                next.valid = true;
                self.pending.push(PendingPreflight {
                    generation: self.generation,
                    handle: self.checker.check(&path),
                });
            }
            Err(e) => {
                warn!("Rejected {}: {}", path.display(), e);
                next.pre_install_message = match e {
                    ExtractError::InvalidArchiveType { .. } => NOT_A_PACKAGE_MESSAGE,
                    ExtractError::MalformedPackage(_) | ExtractError::ToolFailure(_) => {
                        INVALID_PACKAGE_MESSAGE
                    }
                }
                .to_string();
            }
        }

        let previous = std::mem::replace(&mut self.selection, next);
        let changed = previous.changed_fields(&self.selection);
        self.notifier
            .emit_all(changed.into_iter().map(Notification::Changed));
    }

    /// Start installing the selected archive.
    ///
    /// Returns false without touching any state unless the archive is valid,
    /// admissible and no install is running.
    pub fn install(&mut self) -> bool {
        if !self.selection.valid || !self.selection.can_install() {
            debug!("Install refused: archive not valid or not admissible");
            return false;
        }
        let Some(archive) = self.selection.archive.clone() else {
            return false;
        };

        let notifications = match self.session.begin() {
            Ok(notifications) => notifications,
            Err(e) => {
                debug!("Install refused: {}", e);
                return false;
            }
        };
        self.notifier.emit_all(notifications);

        match self.tool.spawn_install(&archive) {
            Ok(events) => self.session.attach(events),
            Err(e) => {
                let notifications = self.session.fail_to_start(&e);
                self.notifier.emit_all(notifications);
            }
        }
        true
    }

    /// Apply background completions (preflight verdicts, install output).
    pub fn poll_events(&mut self) {
        let mut notifications = Vec::new();

        for pending in std::mem::take(&mut self.pending) {
            match pending.handle.try_result() {
                None => self.pending.push(pending),
                Some(verdict) => notifications.extend(self.apply_verdict(&pending, verdict)),
            }
        }

        let before = self.session.state();
        notifications.extend(self.session.poll());
        notifications.extend(self.after_session_change(before));

        self.notifier.emit_all(notifications);
    }

    fn apply_verdict(
        &mut self,
        pending: &PendingPreflight,
        verdict: AdmissibilityVerdict,
    ) -> Vec<Notification> {
        let current = pending.generation == self.generation
            && self.selection.archive.as_deref() == Some(pending.handle.archive());
        if !current {
            debug!(
                "Discarding stale preflight for {} (selection {})",
                pending.handle.archive().display(),
                pending.generation
            );
            return Vec::new();
        }

        let mut next = self.selection.clone();
        next.pre_install_message = verdict.message_text().to_string();
        next.verdict = Some(verdict);

        let previous = std::mem::replace(&mut self.selection, next);
        previous
            .changed_fields(&self.selection)
            .into_iter()
            .map(Notification::Changed)
            .collect()
    }

    fn after_session_change(&mut self, before: SessionState) -> Vec<Notification> {
        if before != SessionState::Running || self.session.state() != SessionState::Succeeded {
            return Vec::new();
        }
        let Some(metadata) = self.selection.metadata.as_ref() else {
            return Vec::new();
        };

        self.installed.refresh();
        let queried = self.installed.query(&metadata.name);
        let installed = if queried.installed && queried.version.is_some() {
            queried
        } else {
            debug!("Package database has not caught up; using archive version");
            InstalledState::installed(metadata.version.clone())
        };

        if installed == self.selection.installed {
            return Vec::new();
        }
        self.selection.installed = installed;
        vec![Notification::Changed(Field::InstalledState)]
    }

    /// Current state as one value.
    pub fn snapshot(&self) -> ControllerSnapshot {
        let selection = &self.selection;
        ControllerSnapshot {
            archive: selection.archive.clone(),
            metadata: selection.metadata.clone(),
            installed_size: selection
                .metadata
                .as_ref()
                .and_then(PackageMetadata::formatted_installed_size),
            installed: selection.installed.clone(),
            valid: selection.valid,
            can_install: selection.can_install(),
            pre_install_message: selection.pre_install_message.clone(),
            rejection_reason: selection.verdict.as_ref().and_then(|v| v.reason),
            preflight_pending: self.preflight_pending(),
            session_state: self.session.state(),
            status_message: self.session.status_message().to_string(),
            status_details: self.session.log().to_string(),
        }
    }

    /// Whether the current selection still waits for its verdict
    pub fn preflight_pending(&self) -> bool {
        self.selection.valid && self.selection.verdict.is_none()
    }

    /// Preflight workers whose results have not been collected, stale ones included
    pub fn outstanding_preflights(&self) -> usize {
        self.pending.len()
    }

    /// Poll until the current selection has a verdict. Returns false on timeout.
    pub fn wait_for_preflight(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_events();
            if !self.preflight_pending() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Poll until the install session leaves `Running`, or `timeout` passes.
    pub fn wait_for_session(&mut self, timeout: Duration) -> SessionState {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_events();
            if !self.session.is_running() || Instant::now() >= deadline {
                return self.session.state();
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Turn user input into an absolute archive path.
///
/// Strips a `file://` scheme; relative paths resolve against the current
/// directory. Returns `None` for empty input.
pub fn normalize_archive_path(input: &str) -> Option<PathBuf> {
    let trimmed = input.trim();
    let raw = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if raw.is_empty() {
        return None;
    }
    std::path::absolute(Path::new(raw)).ok()
}
