//! debinstall Library
//!
//! This library provides the install engine for local Debian packages:
//! archive validation, metadata extraction, preflight checks and a
//! supervised, privileged `dpkg` run behind one controller.

pub mod cli;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod installed;
pub mod metadata;
pub mod mime;
pub mod notify;
pub mod preflight;
pub mod process_guard;
pub mod session;
pub mod supervisor;
pub mod tool;

// Re-export main types for convenience
pub use command::{CommandOutput, run_with_timeout};
pub use config::InstallerConfig;
pub use controller::{ControllerSnapshot, PackageInstallController, normalize_archive_path};
pub use error::{DatabaseError, DebInstallError, ExtractError, Result, ToolError};
pub use installed::{
    CurrentState, DpkgStatusDatabase, InstalledState, InstalledStateQuery, PackageDatabase,
    PackageRecord,
};
pub use metadata::{PackageMetadata, PackageMetadataExtractor, format_byte_size};
pub use mime::{DEBIAN_PACKAGE_MIME, MagicClassifier, MimeClassifier};
pub use notify::{Field, Notification, Notifier};
pub use preflight::{
    AdmissibilityVerdict, DependencyPolicy, PreflightChecker, PreflightHandle, RejectionReason,
};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use session::{InstallSession, SessionState, SessionTransitionError};
pub use supervisor::{ExitOutcome, OutputStream, ProcessEvent, spawn_supervised};
pub use tool::{Dpkg, PackageTool};
