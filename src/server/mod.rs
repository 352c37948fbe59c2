//! TCP listener loop.
//!
//! Accepts producer connections and spawns one reader task per connection,
//! all sharing a single registry. Stopping closes the listener first, then
//! cancels outstanding readers, then drains the registry, so every sink is
//! finalized exactly once even when stop races with active writers.

use crate::ingest::{run_reader, ReaderConfig, RegistryConfig, StreamRegistry};
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to (0 picks an ephemeral port)
    pub port: u16,
    /// Directory WAV files are created in (created if missing)
    pub output_dir: PathBuf,
    /// Maximum accepted header/payload length
    pub max_frame_len: u32,
    /// Close connections idle for longer than this
    pub idle_timeout: Option<Duration>,
}

/// Audio ingest server: listener plus the shared stream registry.
pub struct AudioServer {
    listener: TcpListener,
    registry: Arc<StreamRegistry>,
    reader_config: ReaderConfig,
}

impl AudioServer {
    /// Create the output directory and bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory {}",
                    config.output_dir.display()
                )
            })?;

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;

        info!("Audio ingest server listening on {}", listener.local_addr()?);
        match tokio::fs::canonicalize(&config.output_dir).await {
            Ok(abs) => info!("Output directory: {}", abs.display()),
            Err(_) => info!("Output directory: {}", config.output_dir.display()),
        }

        let registry = Arc::new(StreamRegistry::new(RegistryConfig {
            output_dir: config.output_dir,
        }));

        Ok(Self {
            listener,
            registry,
            reader_config: ReaderConfig {
                max_frame_len: config.max_frame_len,
                idle_timeout: config.idle_timeout,
            },
        })
    }

    /// Address the listener is bound to. Useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `stop` resolves, then run the stop sequence:
    /// close the listener, cancel readers, finalize every open sink.
    pub async fn run<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut readers = JoinSet::new();
        tokio::pin!(stop);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let registry = Arc::clone(&self.registry);
                            let config = self.reader_config.clone();
                            readers.spawn(run_reader(socket, peer, registry, config));
                        }
                        Err(e) => {
                            // Transient accept failures (e.g. fd exhaustion)
                            // leave the listener usable.
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = &mut stop => {
                    info!("Stop requested, closing listener");
                    break;
                }
            }
        }

        // Unblock any reader stuck in a socket read, then drain.
        drop(self.listener);
        readers.abort_all();
        while readers.join_next().await.is_some() {}

        self.registry.shutdown().await;
        info!("Audio ingest server stopped");
        Ok(())
    }
}
