//! Pipe-based child process handle
//!
//! Handles spawning the per-session subprocess, including:
//! - Piped stdin/stdout/stderr with line framing
//! - Ordered output events on a single channel
//! - Idempotent termination
//!
//! Output lines are forwarded in production order; the exit event is
//! emitted only after both output streams have drained, so a consumer
//! never sees `Exited` before the last line.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::SpawnCommand;

/// Size of the output event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Poll interval for exit detection after the output streams close
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Errors that can occur during child process operations
#[derive(Error, Debug)]
pub enum ProcError {
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("Process {0} stream unavailable")]
    StreamUnavailable(&'static str),

    #[error("Failed to write to stdin: {0}")]
    WriteFailed(String),
}

/// Result type for child process operations
pub type ProcResult<T> = Result<T, ProcError>;

/// Event produced by a running child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    /// One line of standard output
    Stdout(String),
    /// One line of standard error
    Stderr(String),
    /// The process exited; no further events follow
    Exited { code: Option<i32> },
}

/// Handle to a running child process.
///
/// The handle owns stdin for input and the process itself for
/// termination; output arrives on the event receiver returned by
/// [`ChildProcess::spawn`].
pub struct ChildProcess {
    id: Uuid,
    child: Arc<Mutex<Child>>,
    stdin: Mutex<ChildStdin>,
}

impl ChildProcess {
    /// Spawn a child process from the given command.
    ///
    /// Returns the handle and the ordered event stream. Stdout and
    /// stderr are read line by line on background tasks; when both
    /// streams reach EOF the exit status is collected and a final
    /// `Exited` event is sent.
    pub fn spawn(command: &SpawnCommand) -> ProcResult<(Self, mpsc::Receiver<ChildEvent>)> {
        let id = Uuid::new_v4();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ProcError::SpawnFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or(ProcError::StreamUnavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcError::StreamUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcError::StreamUnavailable("stderr"))?;

        debug!("Spawned child {} ({})", id, command.display());

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let stdout_task = spawn_line_reader(stdout, event_tx.clone(), ChildEvent::Stdout);
        let stderr_task = spawn_line_reader(stderr, event_tx.clone(), ChildEvent::Stderr);

        let child = Arc::new(Mutex::new(child));
        spawn_exit_waiter(id, Arc::clone(&child), event_tx, stdout_task, stderr_task);

        Ok((
            Self {
                id,
                child,
                stdin: Mutex::new(stdin),
            },
            event_rx,
        ))
    }

    /// Get the process handle ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Write one line to the child's stdin.
    ///
    /// A newline is appended and the pipe is flushed so the child sees
    /// the input immediately.
    pub async fn write_line(&self, line: &str) -> ProcResult<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProcError::WriteFailed(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ProcError::WriteFailed(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| ProcError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Kill the process immediately.
    ///
    /// Safe to call any number of times and after the process has
    /// already exited; repeated or late calls are no-ops.
    pub async fn kill(&self) {
        let mut child = self.child.lock().await;
        match child.start_kill() {
            Ok(()) => debug!("Sent kill to child {}", self.id),
            // start_kill fails once the process has been reaped
            Err(e) => debug!("Kill for child {} ignored: {}", self.id, e),
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Last-resort cleanup if the owner never called kill(). The
        // exit waiter only holds the lock per poll, so this rarely
        // misses; explicit teardown remains the contract.
        if let Ok(mut child) = self.child.try_lock() {
            let _ = child.start_kill();
        }
    }
}

/// Forward one output stream to the event channel, line by line
fn spawn_line_reader<R>(
    stream: R,
    tx: mpsc::Sender<ChildEvent>,
    make_event: fn(String) -> ChildEvent,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    // Receiver dropped means nobody is listening anymore
                    if tx.send(make_event(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Child stream read error: {}", e);
                    break;
                }
            }
        }
    })
}

/// Wait for both output streams to drain, then collect the exit status
/// and emit the final `Exited` event.
fn spawn_exit_waiter(
    id: Uuid,
    child: Arc<Mutex<Child>>,
    event_tx: mpsc::Sender<ChildEvent>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
) {
    tokio::spawn(async move {
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        // The lock is only held per poll so a concurrent kill() can
        // always get through.
        let code = loop {
            {
                let mut child = child.lock().await;
                match child.try_wait() {
                    Ok(Some(status)) => break status.code(),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Failed to collect exit status for child {}: {}", id, e);
                        break None;
                    }
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        };

        debug!("Child {} exited with code {:?}", id, code);
        let _ = event_tx.send(ChildEvent::Exited { code }).await;
    });
}
