//! Server module
//!
//! Serves the bundled browser client over HTTP and bridges WebSocket
//! connections to per-session child processes.

mod http;
mod protocol;
mod ws;

pub use http::*;
pub use protocol::*;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Settings;

/// HTTP/WebSocket server for browser terminal sessions
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Bind the listener for the configured address.
    ///
    /// Port 0 binds an ephemeral port; `local_addr` reports the actual
    /// one.
    pub async fn bind(settings: Settings) -> anyhow::Result<Self> {
        let addr = settings.socket_addr();
        let listener = TcpListener::bind(&addr).await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(AppState {
            settings,
            shutdown_tx,
            active_sessions: AtomicUsize::new(0),
        });
        Ok(Self { listener, state })
    }

    /// Get the bound socket address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a handle that can trigger shutdown after `run` consumes the
    /// server
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.state.shutdown_tx.clone()
    }

    /// Run the server until a shutdown signal is received.
    ///
    /// Connections are handled concurrently; on shutdown every live
    /// session is told to close and the server waits for them to
    /// finish.
    pub async fn run(self) -> anyhow::Result<()> {
        let state = Arc::clone(&self.state);
        let app = http::router(Arc::clone(&state));
        let mut shutdown_rx = state.shutdown_tx.subscribe();

        let addr = self.listener.local_addr()?;
        info!("Listening on http://{} (WebSocket at /ws)", addr);
        info!(
            "Serving assets from {}",
            state.settings.static_dir.display()
        );

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                let active = state.active_sessions.load(Ordering::SeqCst);
                if active > 0 {
                    info!(
                        "Shutdown signal received, waiting for {} active sessions to close...",
                        active
                    );
                } else {
                    info!("Shutdown signal received, stopping server");
                }
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpawnCommand;
    use futures_util::{SinkExt, StreamExt};
    use std::path::Path;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    fn sh(script: &str) -> SpawnCommand {
        SpawnCommand::new("sh").with_args(["-c", script])
    }

    fn test_settings(command: SpawnCommand, dir: &Path) -> Settings {
        Settings {
            bind: "127.0.0.1".to_string(),
            port: 0,
            static_dir: dir.join("static"),
            creds: None,
            creds_path: dir.join("creds.json"),
            command,
        }
    }

    async fn start_server(settings: Settings) -> SocketAddr {
        let server = Server::bind(settings).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn connect(addr: SocketAddr) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .expect("failed to connect");
        ws
    }

    async fn send_command(ws: &mut WsClient, line: &str) {
        let json = serde_json::to_string(&ClientMessage::command_entered(line)).unwrap();
        ws.send(WsMessage::Text(json)).await.unwrap();
    }

    async fn recv_output(ws: &mut WsClient) -> String {
        loop {
            let msg = timeout(RECV_TIMEOUT, ws.next())
                .await
                .expect("timed out waiting for console output")
                .expect("connection closed unexpectedly")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                let ServerMessage::ConsoleOutput { data } = serde_json::from_str(&text).unwrap();
                return data;
            }
        }
    }

    #[tokio::test]
    async fn test_command_echo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(test_settings(SpawnCommand::new("cat"), dir.path())).await;

        let mut ws = connect(addr).await;
        send_command(&mut ws, "balance").await;
        assert_eq!(recv_output(&mut ws).await, "balance");
    }

    #[tokio::test]
    async fn test_command_order_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(test_settings(SpawnCommand::new("cat"), dir.path())).await;

        let mut ws = connect(addr).await;
        send_command(&mut ws, "first").await;
        send_command(&mut ws, "second").await;
        send_command(&mut ws, "third").await;

        assert_eq!(recv_output(&mut ws).await, "first");
        assert_eq!(recv_output(&mut ws).await, "second");
        assert_eq!(recv_output(&mut ws).await, "third");
    }

    #[tokio::test]
    async fn test_creds_materialized_before_child_starts() {
        let dir = tempfile::tempdir().unwrap();
        let command = sh("cat creds.json").with_working_dir(dir.path());
        let mut settings = test_settings(command, dir.path());
        settings.creds = Some("secret123".to_string());
        let creds_path = settings.creds_path.clone();
        let addr = start_server(settings).await;

        let mut ws = connect(addr).await;
        assert_eq!(recv_output(&mut ws).await, "secret123");
        assert_eq!(recv_output(&mut ws).await, "process ended");
        assert_eq!(std::fs::read_to_string(&creds_path).unwrap(), "secret123");
    }

    #[tokio::test]
    async fn test_no_creds_no_file_child_still_starts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = test_settings(SpawnCommand::new("cat"), dir.path());
        let creds_path = settings.creds_path.clone();
        let addr = start_server(settings).await;

        let mut ws = connect(addr).await;
        send_command(&mut ws, "still works").await;
        assert_eq!(recv_output(&mut ws).await, "still works");
        assert!(!creds_path.exists());
    }

    #[tokio::test]
    async fn test_creds_write_failure_reported_session_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = test_settings(SpawnCommand::new("cat"), dir.path());
        settings.creds = Some("secret123".to_string());
        settings.creds_path = dir.path().join("missing").join("creds.json");
        let addr = start_server(settings).await;

        let mut ws = connect(addr).await;
        let warning = recv_output(&mut ws).await;
        assert!(warning.starts_with("unable to write credentials:"));

        send_command(&mut ws, "still works").await;
        assert_eq!(recv_output(&mut ws).await, "still works");
    }

    #[tokio::test]
    async fn test_child_exit_notifies_then_drops_input() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(test_settings(sh("echo done"), dir.path())).await;

        let mut ws = connect(addr).await;
        assert_eq!(recv_output(&mut ws).await, "done");
        assert_eq!(recv_output(&mut ws).await, "process ended");

        // Input after exit goes nowhere: the connection stays open and
        // no further output arrives.
        send_command(&mut ws, "late").await;
        let silent = timeout(Duration::from_millis(300), ws.next()).await;
        assert!(silent.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(test_settings(sh("echo $$; exec sleep 30"), dir.path())).await;

        let mut ws = connect(addr).await;
        let pid = recv_output(&mut ws).await;
        assert!(pid.parse::<u32>().is_ok());
        assert!(pid_alive(&pid));

        drop(ws);

        let mut killed = false;
        for _ in 0..50 {
            if !pid_alive(&pid) {
                killed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(killed, "child {} survived disconnect", pid);
    }

    fn pid_alive(pid: &str) -> bool {
        std::process::Command::new("kill")
            .args(["-0", pid])
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_spawn_failure_reported() {
        let dir = tempfile::tempdir().unwrap();
        let command = SpawnCommand::new("definitely-not-a-real-binary");
        let addr = start_server(test_settings(command, dir.path())).await;

        let mut ws = connect(addr).await;
        let report = recv_output(&mut ws).await;
        assert!(report.starts_with("failed to start:"));
    }

    #[tokio::test]
    async fn test_malformed_message_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_server(test_settings(SpawnCommand::new("cat"), dir.path())).await;

        let mut ws = connect(addr).await;
        ws.send(WsMessage::Text("not json".to_string())).await.unwrap();
        ws.send(WsMessage::Text(r#"{"type": "resize"}"#.to_string()))
            .await
            .unwrap();

        send_command(&mut ws, "still here").await;
        assert_eq!(recv_output(&mut ws).await, "still here");
    }

    #[tokio::test]
    async fn test_static_assets_served() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        std::fs::create_dir(&static_dir).unwrap();
        std::fs::write(static_dir.join("index.html"), "<html>termbridge</html>").unwrap();
        std::fs::write(static_dir.join("style.css"), "body { margin: 0; }").unwrap();

        let addr = start_server(test_settings(SpawnCommand::new("cat"), dir.path())).await;

        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "<html>termbridge</html>");

        let css = reqwest::get(format!("http://{}/style.css", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(css, "body { margin: 0; }");
    }

    #[tokio::test]
    async fn test_missing_asset_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = dir.path().join("static");
        std::fs::create_dir(&static_dir).unwrap();

        let addr = start_server(test_settings(SpawnCommand::new("cat"), dir.path())).await;

        let status = reqwest::get(format!("http://{}/nope.js", addr))
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 404);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(test_settings(SpawnCommand::new("cat"), dir.path()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let run = tokio::spawn(server.run());

        let mut ws = connect(addr).await;
        send_command(&mut ws, "warm").await;
        assert_eq!(recv_output(&mut ws).await, "warm");

        let _ = shutdown.send(());

        // The server closes the connection and run() returns.
        let closed = timeout(RECV_TIMEOUT, async {
            loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        timeout(RECV_TIMEOUT, run).await.unwrap().unwrap().unwrap();
    }
}
