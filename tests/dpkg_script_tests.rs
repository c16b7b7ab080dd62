//! Real command paths against a scripted stand-in for dpkg
//!
//! Each test writes a small `sh` script that answers `-I`, `--dry-run -i`
//! and `-i` the way dpkg would, then drives `Dpkg` and the controller
//! through it. No test needs root or a Debian system.

use debinstall::{
    Dpkg, InstallerConfig, PackageInstallController, PackageTool, SessionState, ToolError,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

const INFO: &str = " new Debian package, version 2.0.
 Package: hello
 Version: 2.10-3
 Maintainer: Debian QA Group <packages@qa.debian.org>
 Installed-Size: 280
 Homepage: https://www.gnu.org/software/hello/
 Description: example package based on GNU hello
  The GNU hello program produces a familiar, friendly greeting.
";

struct FakeDpkg {
    dir: TempDir,
    script: PathBuf,
    archive: PathBuf,
    status: PathBuf,
}

impl FakeDpkg {
    /// `trial` and `install` are shell snippets run for the respective mode.
    fn new(trial: &str, install: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");

        let info = dir.path().join("info.txt");
        fs::write(&info, INFO).expect("write info");

        let script = dir.path().join("dpkg");
        let body = format!(
            "#!/bin/sh\ncase \"$1\" in\n  -I) cat '{}' ;;\n  --dry-run) {} ;;\n  -i) {} ;;\n  *) exit 64 ;;\nesac\n",
            info.display(),
            trial,
            install
        );
        fs::write(&script, body).expect("write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

        let archive = dir.path().join("hello_2.10-3_amd64.deb");
        fs::write(
            &archive,
            b"!<arch>\ndebian-binary   1700000000  0     0     100644  4         `\n2.0\n",
        )
        .expect("write archive");

        let status = dir.path().join("status");
        fs::write(&status, "Package: other\nStatus: install ok installed\nVersion: 1.0\n")
            .expect("write status");

        Self {
            dir,
            script,
            archive,
            status,
        }
    }

    fn tool(&self, timeout: Duration) -> Dpkg {
        Dpkg::new(&self.script, Vec::new(), timeout)
    }

    fn config(&self) -> InstallerConfig {
        InstallerConfig {
            dpkg_path: self.script.clone(),
            elevation_command: Vec::new(),
            command_timeout_secs: 5,
            status_database: self.status.clone(),
            ..InstallerConfig::default()
        }
    }

    fn archive(&self) -> &Path {
        &self.archive
    }

    fn archive_str(&self) -> String {
        self.archive.display().to_string()
    }
}

#[test]
fn test_inspect_runs_dpkg_info() {
    let fake = FakeDpkg::new("exit 0", "exit 0");
    let output = fake
        .tool(Duration::from_secs(5))
        .inspect(fake.archive())
        .expect("inspect");
    assert!(output.success);
    assert!(output.stdout.contains("Package: hello"));
}

#[test]
fn test_trial_install_reports_failure_output() {
    let fake = FakeDpkg::new(
        "echo 'dpkg: dependency problems prevent configuration of hello:' >&2; exit 1",
        "exit 0",
    );
    let output = fake
        .tool(Duration::from_secs(5))
        .trial_install(fake.archive())
        .expect("trial");
    assert!(!output.success);
    assert_eq!(output.exit_code, Some(1));
    assert!(output.stderr.contains("dependency problems"));
}

#[test]
fn test_trial_install_times_out() {
    let fake = FakeDpkg::new("sleep 30", "exit 0");
    let started = Instant::now();
    let err = fake
        .tool(Duration::from_secs(1))
        .trial_install(fake.archive())
        .expect_err("should time out");
    assert!(matches!(err, ToolError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_controller_installs_through_script() {
    let fake = FakeDpkg::new(
        "exit 0",
        "echo 'Selecting previously unselected package hello.'; echo 'Setting up hello (2.10-3) ...'; exit 0",
    );
    let mut ctl = PackageInstallController::new(&fake.config());

    ctl.set_archive(&fake.archive_str());
    assert!(ctl.wait_for_preflight(WAIT));

    let snap = ctl.snapshot();
    assert!(snap.valid, "rejected: {}", snap.pre_install_message);
    assert!(snap.can_install);
    assert_eq!(snap.metadata.as_ref().map(|m| m.version.as_str()), Some("2.10-3"));
    assert_eq!(snap.installed_size.as_deref(), Some("280.0 KB"));
    assert!(!snap.is_installed());

    // The install script also marks the package installed in the status file
    fs::write(
        &fake.status,
        "Package: hello\nStatus: install ok installed\nVersion: 2.10-3\n",
    )
    .expect("update status");

    assert!(ctl.install());
    assert_eq!(ctl.wait_for_session(WAIT), SessionState::Succeeded);

    let snap = ctl.snapshot();
    assert!(snap.status_details.contains("Setting up hello (2.10-3) ..."));
    assert!(snap.is_installed());
    assert_eq!(snap.installed.version.as_deref(), Some("2.10-3"));
}

#[test]
fn test_controller_reports_failed_install() {
    let fake = FakeDpkg::new(
        "exit 0",
        "echo 'Unpacking hello (2.10-3) ...'; echo 'dpkg: error processing archive hello.deb (--install):' >&2; exit 2",
    );
    let mut ctl = PackageInstallController::new(&fake.config());

    ctl.set_archive(&fake.archive_str());
    assert!(ctl.wait_for_preflight(WAIT));
    assert!(ctl.install());
    assert_eq!(ctl.wait_for_session(WAIT), SessionState::Failed);

    let details = ctl.snapshot().status_details;
    assert_eq!(details.matches("Error:").count(), 1);
    let (_, after) = details.split_once("Error:").expect("marker");
    assert!(after.contains("dpkg: error processing archive"));
}

#[test]
fn test_controller_rejects_unmet_dependencies() {
    let fake = FakeDpkg::new(
        "echo ' hello depends on libc6 (>= 2.99); however:' >&2; exit 1",
        "exit 0",
    );
    let mut ctl = PackageInstallController::new(&fake.config());

    ctl.set_archive(&fake.archive_str());
    assert!(ctl.wait_for_preflight(WAIT));
    let snap = ctl.snapshot();
    assert!(snap.valid);
    assert!(!snap.can_install);
    assert_eq!(snap.pre_install_message, "Error: Unmet dependencies");
    assert!(!ctl.install());
}

#[test]
fn test_controller_rejects_non_package_file() {
    let fake = FakeDpkg::new("exit 0", "exit 0");
    let text = fake.dir.path().join("readme.deb");
    fs::write(&text, "just text with a misleading extension\n").expect("write");

    let mut ctl = PackageInstallController::new(&fake.config());
    ctl.set_archive(&text.display().to_string());

    let snap = ctl.snapshot();
    assert!(!snap.valid);
    assert_eq!(snap.pre_install_message, "Error: Not a valid Debian package");
    assert_eq!(ctl.outstanding_preflights(), 0);
}
