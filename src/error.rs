//! Error taxonomy for the ingest pipeline.
//!
//! Connection-local failures (framing, header parsing) never cross a
//! connection boundary; the binary layer wraps everything in `anyhow`.

use thiserror::Error;

/// Errors produced while decoding frames or persisting fragments.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The peer closed the connection in the middle of a frame.
    #[error("truncated frame while reading {0}")]
    Truncated(&'static str),

    /// A declared header or payload length exceeds the configured bound.
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: u32, max: u32 },

    /// The header bytes were consumed but did not parse as a header record.
    ///
    /// The frame has already been advanced past by its declared lengths,
    /// so the caller may skip it and continue at the next frame boundary.
    #[error("invalid fragment header: {0}")]
    HeaderParse(#[from] serde_json::Error),

    /// A producer declared a sample format the WAV sink does not honor.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The container writer rejected an append or finalize.
    #[error("wav container error: {0}")]
    Wav(#[from] hound::Error),

    /// Routing was rejected because registry shutdown has begun.
    #[error("server is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
