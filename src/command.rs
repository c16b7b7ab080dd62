//! Bounded execution of short diagnostic commands
//!
//! `dpkg -I` and `dpkg --dry-run -i` are expected to finish quickly. Both
//! pipes are drained on helper threads while the parent waits with a
//! deadline, so a chatty child cannot block on a full pipe and a hung child
//! is killed instead of stalling the caller.

use crate::error::ToolError;
use crate::process_guard::CommandProcessGroup;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code (None if terminated by signal)
    pub exit_code: Option<i32>,
    /// Whether the command exited with code 0
    pub success: bool,
}

impl CommandOutput {
    /// Build a successful output with the given stdout.
    pub fn succeeded(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// Build a failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
            ..Self::default()
        }
    }

    /// Stdout followed by stderr; diagnostics may land on either stream.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        text.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
///
/// A non-zero exit is not an error here; callers inspect
/// [`CommandOutput::success`]. Errors are reserved for spawn failures,
/// timeouts and I/O failures while waiting.
pub fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<CommandOutput, ToolError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(
        "run_with_timeout: {} args={:?} timeout={:?}",
        program,
        cmd.get_args().collect::<Vec<_>>(),
        timeout
    );

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: program.clone(),
            reason: e.to_string(),
        })?;

    let stdout_reader = child.stdout.take().map(drain);
    let stderr_reader = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!("{} exceeded {:?}, killing it", program, timeout);
            kill_group(child.id());
            reap(&mut child, stdout_reader, stderr_reader);
            return Err(ToolError::Timeout { program, timeout });
        }
        Err(e) => {
            reap(&mut child, stdout_reader, stderr_reader);
            return Err(ToolError::Io {
                program,
                reason: e.to_string(),
            });
        }
    };

    let output = CommandOutput {
        stdout: join(stdout_reader),
        stderr: join(stderr_reader),
        exit_code: status.code(),
        success: status.success(),
    };
    debug!("{} finished with exit code {:?}", program, output.exit_code);
    Ok(output)
}

/// The child leads its own process group; take its helpers down with it.
fn kill_group(pid: u32) {
    if let Ok(raw) = i32::try_from(pid) {
        let _ = killpg(Pid::from_raw(raw), Signal::SIGKILL);
    }
}

/// Kill and reap an abandoned child, then collect its reader threads.
fn reap(
    child: &mut Child,
    stdout_reader: Option<JoinHandle<Vec<u8>>>,
    stderr_reader: Option<JoinHandle<Vec<u8>>>,
) {
    let _ = child.kill();
    let _ = child.wait();
    join(stdout_reader);
    join(stderr_reader);
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_captures_both_streams() {
        let output = run_with_timeout(&mut sh("echo out; echo err >&2"), Duration::from_secs(5))
            .expect("sh should run");
        assert!(output.success);
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let output = run_with_timeout(&mut sh("echo broken >&2; exit 3"), Duration::from_secs(5))
            .expect("sh should run");
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(3));
        assert!(output.combined().contains("broken"));
    }

    #[test]
    fn test_timeout_kills_child() {
        let start = Instant::now();
        let err = run_with_timeout(&mut sh("sleep 30"), Duration::from_millis(300))
            .expect_err("should time out");
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_reaps_child_and_readers() {
        // The background sleep shares the pipes; the group kill must release them
        let start = Instant::now();
        let err = run_with_timeout(&mut sh("echo partial; sleep 30 & sleep 30"), Duration::from_millis(300))
            .expect_err("should time out");
        assert!(matches!(err, ToolError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run_with_timeout(
            &mut Command::new("/nonexistent/debinstall-tool"),
            Duration::from_secs(1),
        )
        .expect_err("should fail to spawn");
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_combined_separates_streams() {
        let output = CommandOutput {
            stdout: "a".to_string(),
            stderr: "b".to_string(),
            exit_code: Some(1),
            success: false,
        };
        assert_eq!(output.combined(), "a\nb");
    }
}
