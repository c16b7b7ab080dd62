//! Installed-package state lookup
//!
//! [`InstalledStateQuery`] answers "is a package of this name installed, and
//! at which version" from the system package database. The database sits
//! behind [`PackageDatabase`]; the default [`DpkgStatusDatabase`] reads the
//! dpkg status file on first use and keeps it until closed.

use crate::error::DatabaseError;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

/// Whether a package is installed, and at which version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstalledState {
    pub installed: bool,
    pub version: Option<String>,
}

impl InstalledState {
    pub fn not_installed() -> Self {
        Self::default()
    }

    pub fn installed(version: impl Into<String>) -> Self {
        Self {
            installed: true,
            version: Some(version.into()),
        }
    }
}

/// Current state word of a dpkg `Status:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum CurrentState {
    NotInstalled,
    ConfigFiles,
    HalfInstalled,
    Unpacked,
    HalfConfigured,
    TriggersAwaited,
    TriggersPending,
    Installed,
}

impl CurrentState {
    /// Whether a version is recorded as current for this state
    pub fn has_current_version(self) -> bool {
        !matches!(self, Self::NotInstalled | Self::ConfigFiles)
    }
}

/// One package entry of the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub state: CurrentState,
    pub version: Option<String>,
}

/// Read-only access to installed packages.
pub trait PackageDatabase: Send {
    /// Look up a package by name; opens the database if needed.
    fn lookup(&mut self, name: &str) -> Result<Option<PackageRecord>, DatabaseError>;

    /// Drop any loaded state; the next lookup reopens.
    fn close(&mut self);
}

/// The dpkg status file, parsed lazily.
#[derive(Debug)]
pub struct DpkgStatusDatabase {
    path: PathBuf,
    records: Option<HashMap<String, PackageRecord>>,
}

impl DpkgStatusDatabase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.records.is_some()
    }

    fn open(&mut self) -> Result<&HashMap<String, PackageRecord>, DatabaseError> {
        if self.records.is_none() {
            let text = fs::read_to_string(&self.path).map_err(|e| DatabaseError::Unavailable {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
            let records = parse_status(&text);
            debug!("Loaded {} packages from {}", records.len(), self.path.display());
            self.records = Some(records);
        }
        Ok(&*self.records.get_or_insert_with(HashMap::new))
    }
}

impl PackageDatabase for DpkgStatusDatabase {
    fn lookup(&mut self, name: &str) -> Result<Option<PackageRecord>, DatabaseError> {
        Ok(self.open()?.get(name).cloned())
    }

    fn close(&mut self) {
        self.records = None;
    }
}

/// Parse dpkg status text into records keyed by package name.
///
/// Stanzas without a `Package` field or with an unknown state are skipped.
/// When a name appears more than once (one stanza per architecture), an
/// installed stanza wins over any other.
pub fn parse_status(text: &str) -> HashMap<String, PackageRecord> {
    let mut records: HashMap<String, PackageRecord> = HashMap::new();

    for stanza in text.split("\n\n") {
        let Some(record) = parse_stanza(stanza) else {
            continue;
        };
        match records.get(&record.name) {
            Some(existing) if existing.state == CurrentState::Installed => {}
            _ => {
                records.insert(record.name.clone(), record);
            }
        }
    }

    records
}

fn parse_stanza(stanza: &str) -> Option<PackageRecord> {
    let mut name = None;
    let mut status = None;
    let mut version = None;

    for line in stanza.lines() {
        // Continuation lines belong to multi-line fields we do not read
        if line.starts_with([' ', '\t']) {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Package" => name = Some(value.to_string()),
            "Status" => status = value.split_whitespace().nth(2).map(str::to_string),
            "Version" => version = Some(value.to_string()),
            _ => {}
        }
    }

    let name = name.filter(|n| !n.is_empty())?;
    let state = CurrentState::from_str(status.as_deref()?).ok()?;
    Some(PackageRecord {
        name,
        state,
        version: version.filter(|_| state.has_current_version()),
    })
}

/// Installed-state lookups over an owned database handle.
pub struct InstalledStateQuery {
    db: Box<dyn PackageDatabase>,
}

impl InstalledStateQuery {
    pub fn new(db: Box<dyn PackageDatabase>) -> Self {
        Self { db }
    }

    /// Query the installed state of `name`.
    ///
    /// An empty name or an unreadable database yields "not installed".
    pub fn query(&mut self, name: &str) -> InstalledState {
        if name.is_empty() {
            return InstalledState::not_installed();
        }

        match self.db.lookup(name) {
            Ok(Some(record)) => InstalledState {
                installed: record.state == CurrentState::Installed,
                version: record.version,
            },
            Ok(None) => InstalledState::not_installed(),
            Err(e) => {
                warn!("{}; reporting {} as not installed", e, name);
                InstalledState::not_installed()
            }
        }
    }

    /// Forget cached database contents so the next query sees fresh state.
    pub fn refresh(&mut self) {
        info!("Refreshing package database");
        self.db.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "\
Package: foo
Status: install ok installed
Priority: optional
Architecture: amd64
Version: 1.0-1
Description: an installed package
 with a long description

Package: gone
Status: deinstall ok config-files
Architecture: amd64
Version: 0.9

Package: half
Status: install reinstreq half-configured
Version: 2.0

Package: multi
Status: install ok installed
Architecture: amd64
Version: 3.1

Package: multi
Status: deinstall ok not-installed
Architecture: i386
";

    fn query_for(text: &str) -> (tempfile::TempDir, InstalledStateQuery) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status");
        std::fs::write(&path, text).expect("write");
        let query = InstalledStateQuery::new(Box::new(DpkgStatusDatabase::new(path)));
        (dir, query)
    }

    #[test]
    fn test_installed_package() {
        let (_dir, mut query) = query_for(STATUS);
        assert_eq!(query.query("foo"), InstalledState::installed("1.0-1"));
    }

    #[test]
    fn test_config_files_only_is_not_installed() {
        let (_dir, mut query) = query_for(STATUS);
        assert_eq!(query.query("gone"), InstalledState::not_installed());
    }

    #[test]
    fn test_half_configured_keeps_version() {
        let (_dir, mut query) = query_for(STATUS);
        let state = query.query("half");
        assert!(!state.installed);
        assert_eq!(state.version.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_installed_stanza_wins_across_architectures() {
        let (_dir, mut query) = query_for(STATUS);
        assert_eq!(query.query("multi"), InstalledState::installed("3.1"));
    }

    #[test]
    fn test_unknown_and_empty_names() {
        let (_dir, mut query) = query_for(STATUS);
        assert_eq!(query.query("nope"), InstalledState::not_installed());
        assert_eq!(query.query(""), InstalledState::not_installed());
    }

    #[test]
    fn test_missing_database_degrades() {
        let mut query = InstalledStateQuery::new(Box::new(DpkgStatusDatabase::new(
            "/nonexistent/dpkg/status",
        )));
        assert_eq!(query.query("foo"), InstalledState::not_installed());
    }

    #[test]
    fn test_refresh_rereads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("status");
        std::fs::write(&path, "Package: foo\nStatus: install ok not-installed\n").expect("write");

        let mut db = DpkgStatusDatabase::new(&path);
        assert!(!db.is_open());
        let before = db.lookup("foo").expect("lookup").expect("record");
        assert_eq!(before.state, CurrentState::NotInstalled);
        assert!(db.is_open());

        std::fs::write(&path, "Package: foo\nStatus: install ok installed\nVersion: 1.2.3\n")
            .expect("write");
        // Still the cached view until closed
        assert_eq!(
            db.lookup("foo").expect("lookup").expect("record").state,
            CurrentState::NotInstalled
        );

        db.close();
        let after = db.lookup("foo").expect("lookup").expect("record");
        assert_eq!(after.state, CurrentState::Installed);
        assert_eq!(after.version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_current_state_parsing() {
        assert_eq!("triggers-pending".parse::<CurrentState>().unwrap(), CurrentState::TriggersPending);
        assert_eq!(CurrentState::HalfInstalled.to_string(), "half-installed");
        assert!("bogus".parse::<CurrentState>().is_err());
    }
}
