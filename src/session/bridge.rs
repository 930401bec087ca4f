//! Session lifecycle bridge
//!
//! A session owns at most one child process and is single use: it moves
//! `Pending -> Running -> Closed` and never back. `Closed` is reachable
//! from `Pending` (spawn failure) and from `Running` (disconnect or
//! child exit), and teardown is safe to invoke from both paths any
//! number of times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SpawnCommand;
use crate::proc::{ChildEvent, ChildProcess, ProcError};

/// Errors that can occur during session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to start process: {0}")]
    SpawnFailed(String),

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Failed to forward input: {0}")]
    Forward(#[from] ProcError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, child not yet spawned
    Pending,
    /// Child spawned and accepting input
    Running,
    /// Child gone; the session cannot be reused
    Closed,
}

/// Outcome of submitting an inbound line to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Delivery {
    /// The line was written to the child's stdin
    Forwarded,
    /// The session was not running; the line was discarded
    Dropped,
}

/// Event surfaced to the connection handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One chunk of child output, verbatim (stdout or stderr)
    Output(String),
    /// The child exited; the session is closed and no further events follow
    Exited { code: Option<i32> },
}

/// Bridges one connection to its one owned child process.
pub struct SessionBridge {
    id: Uuid,
    command: SpawnCommand,
    state: Arc<RwLock<SessionState>>,
    child: Arc<RwLock<Option<ChildProcess>>>,
    ready: Arc<AtomicBool>,
}

impl SessionBridge {
    /// Create a new session in the `Pending` state
    pub fn new(command: SpawnCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
            state: Arc::new(RwLock::new(SessionState::Pending)),
            child: Arc::new(RwLock::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the current lifecycle state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Whether the child has produced its first output chunk.
    ///
    /// The first chunk is the readiness signal; nothing is sent to the
    /// child to coax it.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Spawn the child process and transition to `Running`.
    ///
    /// Returns the session event stream. On spawn failure the session
    /// transitions straight to `Closed` and cannot be restarted.
    pub async fn start(&self) -> SessionResult<mpsc::Receiver<SessionEvent>> {
        // The state lock is held across the spawn so a second start()
        // can never race past the Pending check.
        let mut state = self.state.write().await;
        if *state != SessionState::Pending {
            return Err(SessionError::AlreadyStarted);
        }

        let (child, child_rx) = match ChildProcess::spawn(&self.command) {
            Ok(spawned) => spawned,
            Err(e) => {
                *state = SessionState::Closed;
                return Err(SessionError::SpawnFailed(e.to_string()));
            }
        };

        info!(
            "Session {} started child {} ({})",
            self.id,
            child.id(),
            self.command.display()
        );

        *self.child.write().await = Some(child);
        *state = SessionState::Running;
        drop(state);

        Ok(self.start_event_forwarder(child_rx))
    }

    /// Forward child events to the session channel, marking readiness on
    /// the first output chunk and closing the session when the child
    /// exits.
    fn start_event_forwarder(
        &self,
        mut child_rx: mpsc::Receiver<ChildEvent>,
    ) -> mpsc::Receiver<SessionEvent> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let state = Arc::clone(&self.state);
        let child = Arc::clone(&self.child);
        let ready = Arc::clone(&self.ready);
        let session_id = self.id;

        tokio::spawn(async move {
            while let Some(event) = child_rx.recv().await {
                match event {
                    ChildEvent::Stdout(line) | ChildEvent::Stderr(line) => {
                        if !ready.swap(true, Ordering::SeqCst) {
                            debug!("Session {} ready (first output received)", session_id);
                        }
                        if event_tx.send(SessionEvent::Output(line)).await.is_err() {
                            break;
                        }
                    }
                    ChildEvent::Exited { code } => {
                        *state.write().await = SessionState::Closed;
                        *child.write().await = None;
                        info!("Session {} child exited with code {:?}", session_id, code);
                        let _ = event_tx.send(SessionEvent::Exited { code }).await;
                        break;
                    }
                }
            }
        });

        event_rx
    }

    /// Forward one inbound line to the child's stdin.
    ///
    /// Lines arriving while the session is not `Running` are dropped:
    /// no queueing, and no error reaches the client. A write failure on
    /// a live session is returned so the caller can report it.
    pub async fn send_command(&self, line: &str) -> SessionResult<Delivery> {
        if self.state().await != SessionState::Running {
            debug!("Session {} dropped input, not running", self.id);
            return Ok(Delivery::Dropped);
        }

        let child = self.child.read().await;
        match child.as_ref() {
            Some(child) => {
                child.write_line(line).await?;
                Ok(Delivery::Forwarded)
            }
            None => {
                debug!("Session {} dropped input, child already gone", self.id);
                Ok(Delivery::Dropped)
            }
        }
    }

    /// Close the session, killing the child if it is still running.
    ///
    /// Idempotent: reachable from the disconnect path and the
    /// natural-exit path without a double kill.
    pub async fn close(&self) {
        *self.state.write().await = SessionState::Closed;

        let child = self.child.write().await.take();
        if let Some(child) = child {
            child.kill().await;
            info!("Session {} closed, child killed", self.id);
        }
    }
}
