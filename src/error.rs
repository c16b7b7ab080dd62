//! Error handling module for debinstall
//!
//! Domain errors are small `thiserror` enums close to the code that raises
//! them; `DebInstallError` is the crate-wide umbrella used at API edges.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to run an external diagnostic or install command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// The program could not be started at all
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The program did not finish within its time budget and was killed
    #[error("{program} timed out after {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    /// Waiting on the program or reading its output failed
    #[error("I/O error while running {program}: {reason}")]
    Io { program: String, reason: String },
}

/// Why metadata extraction from an archive failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// Content sniffing did not identify a Debian binary package
    #[error("{} is not a Debian package (detected {detected})", .path.display())]
    InvalidArchiveType { path: PathBuf, detected: String },

    /// The archive has no usable `Package` control field
    #[error("{} has no Package field", .0.display())]
    MalformedPackage(PathBuf),

    /// The inspection tool failed, timed out, or exited non-zero
    #[error("Archive inspection failed: {0}")]
    ToolFailure(String),
}

/// The package database could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    #[error("Cannot open package database {}: {reason}", .path.display())]
    Unavailable { path: PathBuf, reason: String },
}

impl From<ToolError> for ExtractError {
    fn from(err: ToolError) -> Self {
        Self::ToolFailure(err.to_string())
    }
}

/// Main error type for debinstall
#[derive(Error, Debug)]
pub enum DebInstallError {
    /// IO errors (file operations, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metadata extraction errors
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// External tool errors
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The package database could not be opened
    #[error("Package database unavailable: {0}")]
    DatabaseUnavailable(String),

    /// The privileged install finished unsuccessfully
    #[error("Installation failed: {0}")]
    InstallFailed(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DatabaseError> for DebInstallError {
    fn from(err: DatabaseError) -> Self {
        Self::DatabaseUnavailable(err.to_string())
    }
}

/// Result type alias for debinstall operations
pub type Result<T> = std::result::Result<T, DebInstallError>;

impl DebInstallError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an install failure error
    pub fn install_failed(msg: impl Into<String>) -> Self {
        Self::InstallFailed(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DebInstallError::config("timeout must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: timeout must be positive"
        );

        let err = ExtractError::MalformedPackage(PathBuf::from("/tmp/x.deb"));
        assert_eq!(err.to_string(), "/tmp/x.deb has no Package field");
    }

    #[test]
    fn test_timeout_display_uses_seconds() {
        let err = ToolError::Timeout {
            program: "dpkg".to_string(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "dpkg timed out after 5s");
    }

    #[test]
    fn test_tool_error_becomes_tool_failure() {
        let err: ExtractError = ToolError::Spawn {
            program: "dpkg".to_string(),
            reason: "No such file or directory".to_string(),
        }
        .into();
        assert!(matches!(err, ExtractError::ToolFailure(ref msg) if msg.contains("dpkg")));
    }

    #[test]
    fn test_database_error_conversion() {
        let err: DebInstallError = DatabaseError::Unavailable {
            path: PathBuf::from("/var/lib/dpkg/status"),
            reason: "permission denied".to_string(),
        }
        .into();
        assert!(matches!(err, DebInstallError::DatabaseUnavailable(ref msg) if msg.contains("permission denied")));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DebInstallError = io_err.into();
        assert!(matches!(err, DebInstallError::Io(_)));
    }
}
