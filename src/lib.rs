//! FOURDS - streaming player core for 4DS volumetric video
//!
//! Re-exports all modules for use by the binary target and integration tests.

// Streaming engine (buffers, decode workers, clock, orchestration)
pub mod core;

// Container format and transport
pub mod format;
pub mod net;

// App modules
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod server;

// Re-export commonly used types
pub use crate::config::{StreamConfig, TuningProfile};
pub use crate::core::stream::{Renderer, Stream, StreamStats};
pub use crate::core::{AudioSink, ManualClock, MeshFrame, TimeSource, WallClock};
pub use crate::error::{DecodeError, FormatError, StreamError, StreamResult, TransportError};
pub use crate::events::{BoxedEvent, EventBus, downcast_event};
pub use crate::format::{SequenceIndex, SequenceInfo};
pub use crate::net::{ByteRange, RangeSource, open_source};
