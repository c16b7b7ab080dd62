//! Install session state machine
//!
//! One [`InstallSession`] owns the install attempts of a controller. It is
//! the only place where the session state changes, and every change is
//! validated.
//!
//! # State Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! Running ──→ Failed
//!     ↓          │
//! Succeeded      │
//!     │          │
//!     └──────────┴──→ Running (new session, log cleared)
//! ```
//!
//! The running child is observed through a channel of [`ProcessEvent`]s.
//! Output is appended to the log in arrival order. On failure the collected
//! error output (standard output when stderr was empty) is appended exactly
//! once after an `Error:` marker. Nothing is appended when there is none.

use crate::error::ToolError;
use crate::notify::{Field, Notification};
use crate::supervisor::{ExitOutcome, OutputStream, ProcessEvent};
use serde::Serialize;
use std::sync::mpsc::{Receiver, TryRecvError};
use strum::Display;
use thiserror::Error;
use tracing::{error, info, warn};

pub const STARTING_MESSAGE: &str = "Starting installation";
pub const SUCCESS_MESSAGE: &str = "Installation successful";
pub const FAILURE_MESSAGE: &str = "Installation failed";
pub const ERROR_MARKER: &str = "\nError:\n";

/// Lifecycle of one install attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize)]
pub enum SessionState {
    #[default]
    NotStarted,
    Running,
    Failed,
    Succeeded,
}

impl SessionState {
    /// Returns true for Succeeded and Failed
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self → to` is a legal transition
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::NotStarted | Self::Succeeded | Self::Failed, Self::Running)
                | (Self::Running, Self::Succeeded | Self::Failed)
        )
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionTransitionError {
    /// An install is already in flight
    #[error("An installation is already running")]
    AlreadyRunning,

    /// The transition is not part of the state flow
    #[error("Cannot transition from {from} to {to}")]
    Invalid { from: SessionState, to: SessionState },
}

/// Owner of the install state, log text and child event stream.
#[derive(Debug, Default)]
pub struct InstallSession {
    state: SessionState,
    log: String,
    status_message: String,
    stdout: String,
    stderr: String,
    events: Option<Receiver<ProcessEvent>>,
}

impl InstallSession {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Accumulated log text of the current session
    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    fn transition_to(&mut self, to: SessionState) -> Result<(), SessionTransitionError> {
        if self.state == SessionState::Running && to == SessionState::Running {
            return Err(SessionTransitionError::AlreadyRunning);
        }
        if !self.state.can_transition_to(to) {
            return Err(SessionTransitionError::Invalid {
                from: self.state,
                to,
            });
        }
        info!("Install session: {} -> {}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Enter `Running` with a fresh log.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if a session is in flight; nothing changes then.
    pub fn begin(&mut self) -> Result<Vec<Notification>, SessionTransitionError> {
        self.transition_to(SessionState::Running)?;
        self.log.clear();
        self.stdout.clear();
        self.stderr.clear();
        self.events = None;
        self.status_message = STARTING_MESSAGE.to_string();

        Ok(vec![
            Notification::Changed(Field::SessionState),
            Notification::Changed(Field::StatusDetails),
            Notification::Changed(Field::StatusMessage),
            Notification::RequestInstallView,
        ])
    }

    /// Start observing the spawned child.
    pub fn attach(&mut self, events: Receiver<ProcessEvent>) {
        self.events = Some(events);
    }

    /// The child could not be spawned at all.
    pub fn fail_to_start(&mut self, err: &ToolError) -> Vec<Notification> {
        error!("Install could not start: {}", err);
        self.finish(ExitOutcome::Abnormal(err.to_string()))
    }

    /// Apply everything the child has reported so far without blocking.
    pub fn poll(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        loop {
            let Some(events) = &self.events else {
                break;
            };
            match events.try_recv() {
                Ok(event) => notifications.extend(self.apply(event)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    notifications.extend(self.disconnected());
                    break;
                }
            }
        }
        notifications
    }

    /// Apply one event from the child.
    pub fn apply(&mut self, event: ProcessEvent) -> Vec<Notification> {
        if !self.is_running() {
            warn!("Ignoring process event outside a running session: {:?}", event);
            return Vec::new();
        }
        match event {
            ProcessEvent::Output { stream, chunk } => {
                match stream {
                    OutputStream::Stdout => self.stdout.push_str(&chunk),
                    OutputStream::Stderr => self.stderr.push_str(&chunk),
                }
                vec![self.append_log(&chunk)]
            }
            ProcessEvent::Exited(outcome) => self.finish(outcome),
        }
    }

    /// The event channel closed before an exit was reported.
    pub fn disconnected(&mut self) -> Vec<Notification> {
        self.events = None;
        if !self.is_running() {
            return Vec::new();
        }
        warn!("Install supervisor went away without an exit status");
        self.finish(ExitOutcome::Abnormal(
            "Install process ended without reporting an exit status".to_string(),
        ))
    }

    fn append_log(&mut self, text: &str) -> Notification {
        self.log.push_str(text);
        Notification::LogAppended(text.to_string())
    }

    fn finish(&mut self, outcome: ExitOutcome) -> Vec<Notification> {
        let to = if outcome.is_success() {
            SessionState::Succeeded
        } else {
            SessionState::Failed
        };
        if let Err(e) = self.transition_to(to) {
            warn!("{}", e);
            return Vec::new();
        }
        self.events = None;

        let mut notifications = vec![Notification::Changed(Field::SessionState)];
        if to == SessionState::Succeeded {
            self.status_message = SUCCESS_MESSAGE.to_string();
        } else {
            let details = self.error_details(&outcome);
            warn!("Install failed: {:?}", outcome);
            if !details.trim().is_empty() {
                let section = format!("{}{}", ERROR_MARKER, details);
                notifications.push(self.append_log(&section));
            }
            self.status_message = FAILURE_MESSAGE.to_string();
        }
        notifications.push(Notification::Changed(Field::StatusMessage));
        notifications
    }

    fn error_details(&self, outcome: &ExitOutcome) -> String {
        let captured = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        match outcome {
            ExitOutcome::Abnormal(reason) if captured.trim().is_empty() => reason.clone(),
            _ => captured.clone(),
        }
    }
}
