//! Identity-keyed directory of live WAV sinks.
//!
//! Shared by every connection. The map lock covers only the create-or-lookup
//! step; appends serialize per identity on the sink's own lock, so writers
//! for different identities never contend.

use crate::error::IngestError;
use crate::ingest::protocol::FragmentHeader;
use crate::ingest::sink::WavSink;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Registry configuration
pub struct RegistryConfig {
    /// Directory WAV files are created in
    pub output_dir: PathBuf,
}

/// Process-wide identity -> sink directory.
pub struct StreamRegistry {
    config: RegistryConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    sinks: HashMap<u32, Arc<Mutex<WavSink>>>,
    closed: bool,
}

impl StreamRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                sinks: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Route one fragment to its identity's sink, creating the sink on the
    /// identity's first fragment.
    ///
    /// Rejected with `ShuttingDown` once `shutdown` has begun.
    pub async fn route(
        &self,
        header: &FragmentHeader,
        payload: &[u8],
    ) -> Result<(), IngestError> {
        let sink = self.resolve(header).await?;

        // No await is held while the sink writes; appends from one
        // connection apply in arrival order.
        let mut sink = sink.lock().await;
        if !sink.matches_params(header) {
            warn!(
                "{} (ID: {}): fragment declares {}Hz/{}ch but stream was opened at {}Hz/{}ch",
                sink.display_name(),
                sink.user_id(),
                header.sample_rate,
                header.channels,
                sink.sample_rate(),
                sink.channels()
            );
        }
        sink.append(payload)
    }

    /// Create-or-lookup under the map lock. Two concurrent routes for the
    /// same new identity observe a single sink.
    async fn resolve(
        &self,
        header: &FragmentHeader,
    ) -> Result<Arc<Mutex<WavSink>>, IngestError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(IngestError::ShuttingDown);
        }

        if let Some(sink) = inner.sinks.get(&header.user_id) {
            return Ok(Arc::clone(sink));
        }

        let sink = WavSink::create(header, &self.config.output_dir)?;
        info!(
            "Started recording for {} (ID: {})",
            sink.display_name(),
            sink.user_id()
        );

        let sink = Arc::new(Mutex::new(sink));
        inner.sinks.insert(header.user_id, Arc::clone(&sink));
        Ok(sink)
    }

    /// Number of currently open sinks.
    pub async fn open_streams(&self) -> usize {
        self.inner.lock().await.sinks.len()
    }

    /// Finalize and close every registered sink, then clear the registry.
    ///
    /// New routes are rejected from the moment the closed flag is set. One
    /// sink's finalize failure does not prevent the others from finalizing.
    /// A second call finds an empty map and is a no-op.
    pub async fn shutdown(&self) {
        let drained: Vec<(u32, Arc<Mutex<WavSink>>)> = {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            inner.sinks.drain().collect()
        };

        if !drained.is_empty() {
            info!("Finalizing {} open audio stream(s)", drained.len());
        }

        for (user_id, sink) in drained {
            let mut sink = sink.lock().await;
            if let Err(e) = sink.close() {
                warn!("Failed to finalize stream for identity {}: {}", user_id, e);
            }
        }
    }
}
