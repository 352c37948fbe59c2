//! Process configuration surface.
//!
//! Everything is settable from the command line; bind address and output
//! directory also read from the environment for container deployments.

use crate::ingest::protocol::DEFAULT_MAX_FRAME_LEN;
use crate::server::ServerConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "wavsink",
    version,
    about = "Receives streaming PCM audio over TCP and writes per-speaker WAV files"
)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1", env = "WAVSINK_HOST")]
    pub host: String,

    /// Port to bind to
    #[arg(long, default_value_t = 8888, env = "WAVSINK_PORT")]
    pub port: u16,

    /// Output directory for WAV files
    #[arg(long, default_value = "processed_audio", env = "WAVSINK_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Maximum accepted frame length in bytes (header or payload)
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_size: u32,

    /// Close connections with no complete frame for this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub idle_timeout_secs: u64,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            output_dir: self.output_dir.clone(),
            max_frame_len: self.max_frame_size,
            idle_timeout: self.idle_timeout(),
        }
    }
}
