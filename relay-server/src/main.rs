//! CloudCode Relay - Headless Daemon
//!
//! A pure Rust HTTP server that exposes an OpenAI-compatible Chat
//! Completions API on /v1/* in front of the CloudCode upstream, rotating
//! across a pool of OAuth refresh-token credentials.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use relay_core::server::{build_router, AppState};
use relay_core::{AppConfig, CredentialStore};

const DEFAULT_ACCOUNTS_FILE: &str = "data/accounts.json";

/// Grace period for in-flight requests after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = std::env::var("RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(relay_core::config::DEFAULT_CONFIG_FILE));
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        },
    };

    let accounts_path = std::env::var("RELAY_ACCOUNTS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ACCOUNTS_FILE));
    info!("Credential file: {}", accounts_path.display());
    let store = Arc::new(CredentialStore::new(accounts_path));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::build(config, store).await;
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        },
    };
    info!("Relay listening on http://{addr}");
    info!("OpenAI endpoints under /v1/, stats under /api/stats");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Once a signal arrives the listener
/// closes; a watchdog then bounds the drain of in-flight requests and
/// forces a clean exit if they overstay.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received interrupt, shutting down"),
        _ = terminate => info!("Received terminate, shutting down"),
    }

    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        info!("Grace period elapsed, exiting");
        std::process::exit(0);
    });
}
