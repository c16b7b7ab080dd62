//! Supervision of the long-running install child
//!
//! The supervisor turns a child process into a channel of [`ProcessEvent`]s:
//! output chunks from stdout and stderr in arrival order, followed by
//! exactly one [`ProcessEvent::Exited`]. Consumers never touch the process
//! directly, so tests can drive the same consumer with a hand-built channel.

use crate::error::ToolError;
use crate::process_guard::{self, CommandProcessGroup};
use std::io::{BufRead, BufReader, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use strum::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How the child finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with the given code
    Code(i32),
    /// Killed by a signal or lost; the text describes what happened
    Abnormal(String),
}

impl ExitOutcome {
    /// Normal exit with code 0
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Code(0))
    }
}

/// How long output may keep arriving after the child has exited.
///
/// Descendants that inherited the pipes (a daemon started by a maintainer
/// script) can hold them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Messages sent from the supervisor threads to the session owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of output (one line, newline preserved when present)
    Output { stream: OutputStream, chunk: String },
    /// The child has exited; always the last event
    Exited(ExitOutcome),
}

/// Spawn `cmd` and supervise it on background threads.
///
/// The child runs in its own process group and is tracked by the global
/// child registry until it has been reaped. The exit event follows the
/// child's own exit; output still buffered in the pipes is forwarded for up
/// to `OUTPUT_DRAIN_TIMEOUT` first and anything later is dropped.
pub fn spawn_supervised(mut cmd: Command) -> Result<Receiver<ProcessEvent>, ToolError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
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

    let pid = child.id();
    process_guard::track_child(pid);
    info!("Spawned {} as PID {}", program, pid);

    let (tx, rx) = mpsc::channel();
    // Shared by the readers and the waiter; taken when the exit is reported
    let events: SharedSender = Arc::new(Mutex::new(Some(tx)));

    let readers: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|pipe| stream_lines(pipe, OutputStream::Stdout, Arc::clone(&events))),
        child
            .stderr
            .take()
            .map(|pipe| stream_lines(pipe, OutputStream::Stderr, Arc::clone(&events))),
    ]
    .into_iter()
    .flatten()
    .collect();

    thread::spawn(move || {
        let outcome = match child.wait() {
            Ok(status) => match status.code() {
                Some(code) => ExitOutcome::Code(code),
                None => ExitOutcome::Abnormal(format!("{} terminated abnormally ({})", program, status)),
            },
            Err(e) => ExitOutcome::Abnormal(format!("Failed to wait for {}: {}", program, e)),
        };
        process_guard::untrack_child(pid);
        debug!("PID {} finished: {:?}", pid, outcome);

        if !drain_readers(readers, OUTPUT_DRAIN_TIMEOUT) {
            debug!("Output pipes of PID {} still held open; closing the event stream", pid);
        }

        // Readers still blocked on a pipe find the sender gone and drop their output
        let tx = events.lock().unwrap_or_else(PoisonError::into_inner).take();
        let delivered = tx.is_some_and(|tx| tx.send(ProcessEvent::Exited(outcome)).is_ok());
        if !delivered {
            warn!("Install outcome for PID {} dropped: receiver gone", pid);
        }
    });

    Ok(rx)
}

type SharedSender = Arc<Mutex<Option<Sender<ProcessEvent>>>>;

/// Wait for the readers to hit EOF; false if `timeout` ran out first.
fn drain_readers(readers: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while readers.iter().any(|h| !h.is_finished()) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(DRAIN_POLL_INTERVAL);
    }
    for handle in readers {
        let _ = handle.join();
    }
    true
}

fn stream_lines<R: Read + Send + 'static>(
    pipe: R,
    stream: OutputStream,
    events: SharedSender,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf).into_owned();
                    let guard = events.lock().unwrap_or_else(PoisonError::into_inner);
                    let Some(tx) = guard.as_ref() else {
                        break; // Exit already reported
                    };
                    if tx.send(ProcessEvent::Output { stream, chunk }).is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(e) => {
                    debug!("Stopped reading {}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(rx: Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(Duration::from_secs(10)) {
            let done = matches!(event, ProcessEvent::Exited(_));
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_streams_output_then_exit() {
        let rx = spawn_supervised(sh("echo one; echo two >&2; echo three")).expect("spawn");
        let events = collect(rx);

        assert_eq!(events.last(), Some(&ProcessEvent::Exited(ExitOutcome::Code(0))));
        let stdout: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::Output {
                    stream: OutputStream::Stdout,
                    chunk,
                } => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout, vec!["one\n", "three\n"]);
        assert!(events.contains(&ProcessEvent::Output {
            stream: OutputStream::Stderr,
            chunk: "two\n".to_string(),
        }));
    }

    #[test]
    fn test_nonzero_exit_code_reported() {
        let rx = spawn_supervised(sh("printf 'partial'; exit 2")).expect("spawn");
        let events = collect(rx);
        assert_eq!(
            events,
            vec![
                ProcessEvent::Output {
                    stream: OutputStream::Stdout,
                    chunk: "partial".to_string(),
                },
                ProcessEvent::Exited(ExitOutcome::Code(2)),
            ]
        );
    }

    #[test]
    fn test_exit_reported_while_descendant_holds_pipes() {
        let started = Instant::now();
        let rx = spawn_supervised(sh("sleep 5 & echo done; exit 0")).expect("spawn");
        let events = collect(rx);

        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
        assert_eq!(
            events,
            vec![
                ProcessEvent::Output {
                    stream: OutputStream::Stdout,
                    chunk: "done\n".to_string(),
                },
                ProcessEvent::Exited(ExitOutcome::Code(0)),
            ]
        );
    }

    #[test]
    fn test_signal_is_abnormal() {
        let rx = spawn_supervised(sh("kill -9 $$")).expect("spawn");
        let events = collect(rx);
        assert!(matches!(
            events.last(),
            Some(ProcessEvent::Exited(ExitOutcome::Abnormal(_)))
        ));
    }

    #[test]
    fn test_spawn_failure() {
        let err = spawn_supervised(Command::new("/nonexistent/dpkg")).expect_err("no such binary");
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[test]
    fn test_exit_outcome_success() {
        assert!(ExitOutcome::Code(0).is_success());
        assert!(!ExitOutcome::Code(2).is_success());
        assert!(!ExitOutcome::Abnormal("signal 9".to_string()).is_success());
    }
}
