//! wavsink entry point: parse flags, wire up logging, run the server until
//! a shutdown signal arrives.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use wavsink::{AudioServer, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.verbose);

    info!("Starting wavsink v{}", env!("CARGO_PKG_VERSION"));

    let server = AudioServer::bind(config.server_config()).await?;
    server.run(shutdown_signal()).await
}

/// Process-wide logging wiring, done once at startup. `RUST_LOG` overrides
/// the level chosen by `--verbose`.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "wavsink=debug" } else { "wavsink=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Resolves when SIGINT (Ctrl+C) or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
