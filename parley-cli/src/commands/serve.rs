//! Parley serve command
//!
//! Links the messaging session (pairing on first run), then serves the HTTP API
//! until Ctrl-C or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use parley_core::{ConnectionManager, FileCredentialStore, TerminalPresenter, WsTransport};
use parley_server::{AppState, ParleyServer, ServerConfig};
use tokio::signal;
use tracing::{info, warn};

use crate::config::ParleyConfig;

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides configuration)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides configuration)
    #[arg(long)]
    pub host: Option<String>,
}

/// Run the serve command
pub async fn run(args: ServeArgs, config: ParleyConfig) -> Result<()> {
    let server_config = ServerConfig::new(
        args.host.unwrap_or_else(|| config.server.host.clone()),
        args.port.unwrap_or(config.server.port),
    );

    let manager = ConnectionManager::new(
        Arc::new(WsTransport::new(config.transport())),
        Arc::new(FileCredentialStore::new(&config.session.auth_dir)),
        Arc::new(TerminalPresenter),
        config.connection.clone(),
    );

    info!(
        bridge = %config.session.bridge_url,
        auth_dir = %config.session.auth_dir.display(),
        "Connecting messaging session"
    );

    tokio::select! {
        result = connect_with_retry(&manager) => result?,
        () = shutdown_signal() => {
            manager.disconnect().await;
            return Ok(());
        }
    }

    let state = AppState::new(
        manager.clone(),
        config.access.api_key.as_str(),
        &config.access.allowed_phones,
    )
    .with_address_domain(config.access.address_domain.as_str());

    info!(
        "Starting parley server on {}:{}",
        server_config.host, server_config.port
    );
    let result = ParleyServer::new(server_config, Arc::new(state))
        .run(shutdown_signal())
        .await;

    manager.disconnect().await;
    result.map_err(Into::into)
}

/// Connect, waiting out reconnects the manager schedules on its own.
///
/// Timeouts, logouts and every other failure end the command.
async fn connect_with_retry(manager: &ConnectionManager) -> Result<()> {
    loop {
        match manager.connect().await {
            Ok(()) => {
                info!("Messaging session open");
                return Ok(());
            }
            Err(e) if e.is_reconnecting() => {
                warn!(error = %e, "Connection attempt failed, waiting for reconnect");
            }
            Err(e) => return Err(e).context("Failed to connect messaging session"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
