//! Fragment ingest pipeline.
//!
//! ```text
//! +----------+     +---------------+     +----------+     +---------+
//! | Listener | --> | Reader (1 per | --> | Registry | --> | WavSink |
//! | (accept) |     |  connection)  |     | (route)  |     | (1/id)  |
//! +----------+     +---------------+     +----------+     +---------+
//! ```
//!
//! The codec and readers are connection-scoped; the registry and sinks are
//! process-scoped and live until shutdown.

pub mod protocol;
pub mod reader;
pub mod registry;
pub mod sink;

pub use protocol::{
    encode_fragment, read_fragment, Fragment, FragmentHeader, DEFAULT_CHANNELS,
    DEFAULT_MAX_FRAME_LEN, DEFAULT_SAMPLE_RATE, SUPPORTED_FORMAT,
};
pub use reader::{run_reader, ReaderConfig};
pub use registry::{RegistryConfig, StreamRegistry};
pub use sink::WavSink;
