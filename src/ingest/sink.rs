//! WAV output sink for a single speaker identity.
//!
//! Created lazily on the first fragment for an identity, appended to for
//! the rest of the process lifetime, finalized exactly once at shutdown.

use crate::error::IngestError;
use crate::ingest::protocol::{FragmentHeader, SUPPORTED_FORMAT};
use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Seconds of recorded audio between progress observations.
const PROGRESS_INTERVAL_SECS: u64 = 10;

/// Append-only WAV writer for one identity's accumulated audio.
pub struct WavSink {
    user_id: u32,
    display_name: String,
    sample_rate: u32,
    channels: u16,
    path: PathBuf,
    writer: Option<WavWriter<BufWriter<File>>>,
    bytes_written: u64,
    next_progress_secs: u64,
    /// Low byte of a sample split across fragment boundaries.
    pending: Option<u8>,
}

impl WavSink {
    /// Open a new WAV file for this identity, named after the first
    /// fragment's header and timestamped at creation.
    pub fn create(header: &FragmentHeader, output_dir: &Path) -> Result<Self, IngestError> {
        let display_name = header.display_name();
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");

        let filename = if header.user_id == 0 {
            format!(
                "mixed_audio_{}_{}Hz_{}ch.wav",
                timestamp, header.sample_rate, header.channels
            )
        } else {
            format!(
                "user_{}_{}_{}_{}Hz_{}ch.wav",
                header.user_id,
                sanitize_name(&display_name),
                timestamp,
                header.sample_rate,
                header.channels
            )
        };
        let path = output_dir.join(filename);

        if !header.is_supported_format() {
            // Reference behavior: the payload is written as raw 16-bit PCM
            // regardless, so a lying producer corrupts its own output.
            warn!(
                "{}: declared format {:?} is not {}; writing payload as raw 16-bit PCM",
                display_name, header.format, SUPPORTED_FORMAT
            );
        }

        let spec = WavSpec {
            channels: header.channels,
            sample_rate: header.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)?;

        info!("Creating WAV file: {}", path.display());

        Ok(Self {
            user_id: header.user_id,
            display_name,
            sample_rate: header.sample_rate,
            channels: header.channels,
            path,
            writer: Some(writer),
            bytes_written: 0,
            next_progress_secs: PROGRESS_INTERVAL_SECS,
            pending: None,
        })
    }

    /// Append payload bytes as little-endian 16-bit PCM frame data.
    ///
    /// Payload bytes are written contiguously: an odd-length fragment
    /// leaves its trailing byte carried as the low byte of the next
    /// fragment's first sample. Emits one progress observation each time
    /// the recorded duration crosses another 10-second boundary since the
    /// last observation.
    pub fn append(&mut self, payload: &[u8]) -> Result<(), IngestError> {
        let Some(writer) = self.writer.as_mut() else {
            // Closed sink: shutdown already finalized the file.
            return Ok(());
        };

        let mut bytes = payload;
        if let Some(low) = self.pending.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    writer.write_sample(i16::from_le_bytes([low, high]))?;
                    bytes = rest;
                }
                None => self.pending = Some(low),
            }
        }

        let mut samples = bytes.chunks_exact(2);
        for sample in samples.by_ref() {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        if let Some(&low) = samples.remainder().first() {
            self.pending = Some(low);
        }

        self.bytes_written += payload.len() as u64;

        let elapsed = self.elapsed_secs();
        if elapsed >= self.next_progress_secs {
            info!(
                "{} (ID: {}): {:.1}s recorded ({} bytes)",
                self.display_name,
                self.user_id,
                self.duration_secs(),
                self.bytes_written
            );
            self.next_progress_secs =
                (elapsed / PROGRESS_INTERVAL_SECS + 1) * PROGRESS_INTERVAL_SECS;
        }

        Ok(())
    }

    /// Finalize the container, writing correct length fields into the WAV
    /// header. A carried half-sample byte cannot form a complete 16-bit
    /// sample and is dropped. Idempotent: a second call is a no-op.
    pub fn close(&mut self) -> Result<(), IngestError> {
        self.pending = None;
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                "Closed WAV file: {} ({:.2}s, {} bytes)",
                self.path.display(),
                self.duration_secs(),
                self.bytes_written
            );
        }
        Ok(())
    }

    /// Whether a later fragment's header matches the parameters this sink
    /// was created with.
    pub fn matches_params(&self, header: &FragmentHeader) -> bool {
        self.sample_rate == header.sample_rate && self.channels == header.channels
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Recorded duration in whole seconds, derived from bytes written.
    pub fn elapsed_secs(&self) -> u64 {
        self.bytes_written / self.bytes_per_sec()
    }

    /// Recorded duration in fractional seconds.
    pub fn duration_secs(&self) -> f64 {
        self.bytes_written as f64 / self.bytes_per_sec() as f64
    }

    fn bytes_per_sec(&self) -> u64 {
        // 16-bit samples: 2 bytes per sample per channel.
        self.sample_rate as u64 * self.channels as u64 * 2
    }
}

/// Replace any character that is not alphanumeric, `-`, or `_` with `_`.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
