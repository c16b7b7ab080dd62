//! Change notifications for controller observers
//!
//! Subscribers receive every notification over their own channel. A
//! subscriber whose receiver is gone is dropped on the next emit.

use std::sync::mpsc::{self, Receiver, Sender};
use strum::Display;

/// Readable controller fields that can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    ArchivePath,
    Metadata,
    InstalledState,
    Valid,
    CanInstall,
    PreInstallMessage,
    SessionState,
    StatusMessage,
    StatusDetails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A readable field changed; read the new value from a snapshot
    Changed(Field),
    /// Text appended to the install log
    LogAppended(String),
    /// The caller should switch to the install-progress view
    RequestInstallView,
}

/// Fan-out of notifications to any number of subscribers.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Vec<Sender<Notification>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn emit(&mut self, notification: Notification) {
        self.subscribers
            .retain(|tx| tx.send(notification.clone()).is_ok());
    }

    pub fn emit_all(&mut self, notifications: impl IntoIterator<Item = Notification>) {
        for notification in notifications {
            self.emit(notification);
        }
    }
}
