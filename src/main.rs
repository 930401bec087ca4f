//! termbridge server
//!
//! Relays an interactive child process to browser clients: the terminal
//! UI is served over HTTP, session traffic flows over WebSocket, and
//! each connection owns exactly one subprocess.

mod config;
mod creds;
mod proc;
mod server;
mod session;

use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{CliOverrides, Settings};
use server::Server;

/// Web terminal bridge server
///
/// Serves the browser terminal and bridges it to a child process
#[derive(Parser, Debug)]
#[command(name = "termbridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT and the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Directory of browser assets
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("termbridge v{}", env!("CARGO_PKG_VERSION"));

    // The environment is read here, once; everything downstream gets
    // explicit configuration.
    let settings = Settings::load(
        args.config.as_deref(),
        CliOverrides {
            bind: args.bind,
            port: args.port,
            static_dir: args.static_dir,
        },
    )?;

    if settings.creds.is_some() {
        info!(
            "Credential blob present, target file {}",
            settings.creds_path.display()
        );
    }
    info!("Session command: {}", settings.command.display());

    let server = Server::bind(settings).await?;
    let shutdown = server.shutdown_handle();

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        let _ = shutdown.send(());
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
