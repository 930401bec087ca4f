//! Per-connection session handling
//!
//! Each WebSocket connection gets exactly one session: credentials are
//! materialized best-effort, one child process is spawned, and the two
//! directions are relayed until the connection or the child goes away.
//! Teardown runs on every exit path and is idempotent.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::http::AppState;
use super::protocol::{ClientMessage, ServerMessage};
use crate::creds::CredentialFile;
use crate::session::{Delivery, SessionBridge, SessionEvent};

/// Synthetic status shown when the child exits
const PROCESS_ENDED: &str = "process ended";

/// Handle one WebSocket connection for its whole lifetime
pub(super) async fn serve_session(socket: WebSocket, state: Arc<AppState>) {
    let active = state.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
    debug!("Client connected ({} active)", active);

    run_session(socket, &state).await;

    let active = state.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    debug!("Client disconnected ({} active)", active);
}

async fn run_session(socket: WebSocket, state: &AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Credential materialization is best effort: a failure is reported
    // to the client but the session still starts.
    match &state.settings.creds {
        Some(value) => {
            let creds = CredentialFile::new(&state.settings.creds_path);
            if let Err(e) = creds.materialize(value).await {
                warn!("{}", e);
                send_output(&mut sender, &format!("unable to write credentials: {}", e)).await;
            }
        }
        None => info!("No credential blob configured, skipping credential file"),
    }

    let session = SessionBridge::new(state.settings.command.clone());
    let mut events = match session.start().await {
        Ok(events) => events,
        Err(e) => {
            warn!("Session {} failed to start: {}", session.id(), e);
            send_output(&mut sender, &format!("failed to start: {}", e)).await;
            return;
        }
    };

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let mut events_done = false;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(&session, &mut sender, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Ignoring binary message ({} bytes)", data.len());
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Transport keepalive, answered by the WebSocket layer
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Session {} client requested close", session.id());
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("Session {} WebSocket error: {}", session.id(), e);
                        break;
                    }
                    None => break,
                }
            }
            event = events.recv(), if !events_done => {
                match event {
                    Some(SessionEvent::Output(line)) => {
                        // A failed send means the client is gone; the
                        // output is discarded and teardown runs below.
                        if !send_output(&mut sender, &line).await {
                            break;
                        }
                    }
                    Some(SessionEvent::Exited { code }) => {
                        info!("Session {} process ended with code {:?}", session.id(), code);
                        // The connection stays open; later input is
                        // dropped by the closed session.
                        send_output(&mut sender, PROCESS_ENDED).await;
                    }
                    None => events_done = true,
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Session {} closing for server shutdown", session.id());
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    if !session.is_ready() {
        debug!(
            "Session {} closing before the child produced any output",
            session.id()
        );
    }
    session.close().await;
}

/// Decode one inbound frame and forward it to the child
async fn handle_client_text(
    session: &SessionBridge,
    sender: &mut SplitSink<WebSocket, Message>,
    text: &str,
) {
    match ClientMessage::from_json(text) {
        Ok(ClientMessage::CommandEntered { data }) => {
            match session.send_command(&data).await {
                Ok(Delivery::Forwarded) => {}
                Ok(Delivery::Dropped) => {
                    debug!("Session {} dropped command", session.id());
                }
                Err(e) => {
                    warn!("Session {} input error: {}", session.id(), e);
                    send_output(sender, &format!("input error: {}", e)).await;
                }
            }
        }
        Err(e) => {
            debug!("Ignoring malformed client message: {}", e);
        }
    }
}

/// Send one console_output message. Returns false when the client is
/// unreachable; delivery failures are not retried.
async fn send_output(sender: &mut SplitSink<WebSocket, Message>, text: &str) -> bool {
    match ServerMessage::console_output(text).to_json() {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode console output: {}", e);
            true
        }
    }
}
