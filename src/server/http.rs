//! HTTP routing
//!
//! One router serves both halves of the external interface: the `/ws`
//! WebSocket upgrade and the bundled browser assets for every other
//! path.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::ws;
use crate::config::Settings;

/// State shared by all connection handlers
pub struct AppState {
    /// Resolved server settings
    pub settings: Settings,
    /// Broadcast used to tell live connections to shut down
    pub shutdown_tx: broadcast::Sender<()>,
    /// Number of currently connected sessions
    pub active_sessions: AtomicUsize,
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let assets = ServeDir::new(&state.settings.static_dir);

    Router::new()
        .route("/ws", get(ws_upgrade))
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Upgrade an HTTP request to a WebSocket session
async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| ws::serve_session(socket, state))
}
