//! wavsink: real-time PCM audio ingest over TCP.
//!
//! Producers stream length-prefixed fragments (JSON header + raw PCM
//! payload); fragments are demultiplexed by speaker identity and each
//! identity's audio grows a single WAV file until server shutdown.

pub mod config;
pub mod error;
pub mod ingest;
pub mod server;

pub use config::Config;
pub use error::IngestError;
pub use server::{AudioServer, ServerConfig};
