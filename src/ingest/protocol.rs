//! Wire protocol for PCM fragment ingest.
//!
//! Frame format (all lengths big-endian):
//!
//! ```text
//! frame := header_len:u32 | header_bytes:u8[header_len]
//!          payload_len:u32 | payload_bytes:u8[payload_len]
//! ```
//!
//! The header is a UTF-8 JSON record; the payload is raw PCM. A connection
//! carries repeated frames until the peer disconnects.

use crate::error::IngestError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default maximum accepted header/payload length (64MB).
/// Prevents unbounded buffering from a malicious or buggy peer.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Sample rate assumed when the producer omits it (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 32000;

/// Channel count assumed when the producer omits it.
pub const DEFAULT_CHANNELS: u16 = 1;

/// The only sample format the WAV sink honors.
pub const SUPPORTED_FORMAT: &str = "pcm_s16le";

// =============================================================================
// Fragment header
// =============================================================================

/// Per-fragment metadata, as sent by the producer.
///
/// Field names match the wire protocol. Unknown fields (e.g. the producer's
/// `type` tag) are ignored; absent fields take the documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHeader {
    /// Speaker identity; 0 is reserved for the mixed/composite stream.
    #[serde(default)]
    pub user_id: u32,

    /// Display name, used only for filenames and logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    /// Sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of interleaved channels.
    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Declared sample format, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Producer-supplied capture time in milliseconds, advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_channels() -> u16 {
    DEFAULT_CHANNELS
}

impl FragmentHeader {
    pub fn new(user_id: u32) -> Self {
        Self {
            user_id,
            user_name: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: None,
            timestamp: None,
        }
    }

    /// Display name for logs and filenames, synthesized when absent.
    pub fn display_name(&self) -> String {
        match &self.user_name {
            Some(name) => name.clone(),
            None => format!("User_{}", self.user_id),
        }
    }

    /// Whether the declared format (if any) is the one the sink honors.
    pub fn is_supported_format(&self) -> bool {
        match &self.format {
            Some(format) => format == SUPPORTED_FORMAT,
            None => true,
        }
    }
}

/// A decoded `(header, payload)` pair.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Bytes,
}

// =============================================================================
// Frame reading/writing
// =============================================================================

/// Read one fragment from the stream.
///
/// Returns `Ok(None)` when the source is exhausted exactly at a frame
/// boundary. EOF anywhere inside a frame is a `Truncated` error. A header
/// that fails to parse yields `HeaderParse` after the whole frame (header
/// and payload) has been consumed, so the caller can skip it and keep
/// reading at the next frame boundary.
pub async fn read_fragment<R: AsyncRead + Unpin>(
    r: &mut R,
    max_frame_len: u32,
) -> Result<Option<Fragment>, IngestError> {
    let header_len = match read_len_prefix(r).await? {
        Some(len) => len,
        None => return Ok(None),
    };
    check_len(header_len, max_frame_len)?;

    let mut header_bytes = vec![0u8; header_len as usize];
    r.read_exact(&mut header_bytes)
        .await
        .map_err(|e| eof_to_truncated(e, "header bytes"))?;

    let payload_len = r
        .read_u32()
        .await
        .map_err(|e| eof_to_truncated(e, "payload length"))?;
    check_len(payload_len, max_frame_len)?;

    let mut payload = vec![0u8; payload_len as usize];
    r.read_exact(&mut payload)
        .await
        .map_err(|e| eof_to_truncated(e, "payload bytes"))?;

    // Parse last: the frame is fully consumed even when the header is junk.
    let header: FragmentHeader = serde_json::from_slice(&header_bytes)?;

    Ok(Some(Fragment {
        header,
        payload: Bytes::from(payload),
    }))
}

/// Encode one fragment as a wire frame.
pub fn encode_fragment(
    header: &FragmentHeader,
    payload: &[u8],
) -> Result<Bytes, IngestError> {
    let header_bytes = serde_json::to_vec(header)?;

    let mut buf = BytesMut::with_capacity(8 + header_bytes.len() + payload.len());
    buf.put_u32(header_bytes.len() as u32);
    buf.put_slice(&header_bytes);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);

    Ok(buf.freeze())
}

/// Read a 4-byte length prefix.
///
/// EOF before the first byte is a clean end-of-stream (`Ok(None)`);
/// EOF after a partial prefix is a truncation.
async fn read_len_prefix<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<Option<u32>, IngestError> {
    let mut buf = [0u8; 4];
    let n = r.read(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    r.read_exact(&mut buf[n..])
        .await
        .map_err(|e| eof_to_truncated(e, "frame length"))?;
    Ok(Some(u32::from_be_bytes(buf)))
}

fn check_len(len: u32, max: u32) -> Result<(), IngestError> {
    if len > max {
        return Err(IngestError::FrameTooLarge { len, max });
    }
    Ok(())
}

fn eof_to_truncated(e: std::io::Error, what: &'static str) -> IngestError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        IngestError::Truncated(what)
    } else {
        IngestError::Io(e)
    }
}

// =============================================================================
// Tests
// =============================================================================
