//! Per-connection receive loop.
//!
//! One reader task runs per accepted socket, decoding frames and routing
//! fragments into the shared registry until EOF, a fatal decode error, or
//! the idle timeout. Failures here are connection-local.

use crate::error::IngestError;
use crate::ingest::protocol::read_fragment;
use crate::ingest::registry::StreamRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Reader configuration
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum accepted header/payload length
    pub max_frame_len: u32,
    /// Close the connection after this long without a complete read
    pub idle_timeout: Option<Duration>,
}

/// Drive one connection until it terminates. The socket is closed on return.
pub async fn run_reader(
    mut socket: TcpStream,
    peer: SocketAddr,
    registry: Arc<StreamRegistry>,
    config: ReaderConfig,
) {
    info!("Client connected from {}", peer);

    loop {
        let result = match config.idle_timeout {
            Some(limit) => {
                match timeout(limit, read_fragment(&mut socket, config.max_frame_len)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Closing connection from {}: idle for {:?}", peer, limit);
                        break;
                    }
                }
            }
            None => read_fragment(&mut socket, config.max_frame_len).await,
        };

        match result {
            Ok(Some(fragment)) => {
                match registry.route(&fragment.header, &fragment.payload).await {
                    Ok(()) => {}
                    Err(IngestError::ShuttingDown) => {
                        debug!("Dropping fragment from {}: registry shut down", peer);
                        break;
                    }
                    Err(e) => {
                        // The fragment is lost; the connection keeps flowing
                        // so other identities on it are unaffected.
                        error!(
                            "Failed to persist fragment for identity {} from {}: {}",
                            fragment.header.user_id, peer, e
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(IngestError::HeaderParse(e)) => {
                // The codec already advanced past the frame by its declared
                // lengths; the next read starts at a frame boundary.
                warn!("Skipping fragment with invalid header from {}: {}", peer, e);
            }
            Err(e) => {
                warn!("Terminating connection from {}: {}", peer, e);
                break;
            }
        }
    }

    info!("Client {} disconnected", peer);
}
