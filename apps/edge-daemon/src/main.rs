//! # BoxSync Edge Daemon
//!
//! Runs the sync agent on a box until it is asked to stop.
//!
//! ## Configuration
//! - `BOXSYNC_CONFIG` - path to `edge.toml` (defaults to the platform config dir)
//! - `BOXSYNC_*` - per-field overrides, see [`boxsync_edge::EdgeConfig`]
//! - `RUST_LOG` - log filter (default `info`)

use std::path::PathBuf;
use std::sync::Arc;

use boxsync_core::SyncReport;
use boxsync_edge::{ConnectionState, EdgeConfig, SyncAgentBuilder, SyncEventEmitter};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting BoxSync edge daemon...");

    let config_path = std::env::var("BOXSYNC_CONFIG").ok().map(PathBuf::from);
    let config = EdgeConfig::load(config_path)?;
    info!(
        server = %config.server.url,
        identity = ?config.identity.record_path,
        "Configuration loaded"
    );

    let handle = SyncAgentBuilder::from_config(&config)?
        .with_emitter(Arc::new(LogEmitter))
        .build()
        .start();

    shutdown_signal().await;

    handle.shutdown().await;
    info!("Edge daemon shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG=boxsync=debug` shows the connection and debounce internals.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Forwards agent status events to the log.
struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_state(&self, state: ConnectionState) {
        info!(target: "boxsync::status", %state, "Connection state changed");
    }

    fn emit_report(&self, report: &SyncReport) {
        info!(
            target: "boxsync::status",
            downloaded = report.downloaded,
            uploaded = report.uploaded,
            "Sync pass completed"
        );
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        if retryable {
            warn!(target: "boxsync::status", message, "Sync error");
        } else {
            error!(target: "boxsync::status", message, "Sync error");
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping sync agent...");
}
