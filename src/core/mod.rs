//! Runtime engine: buffers, decode workers, playback clock, orchestration.
//!
//! These modules form the streaming pipeline, independent of any front end.

pub mod chunk_queue;
pub mod clock;
pub mod codec;
pub mod decode_pool;
pub mod frame_cache;
pub mod loader;
pub mod player;
pub mod stream;
pub mod streamer;

// Re-exports for convenience
pub use chunk_queue::{ChunkQueue, QueueMode};
pub use clock::{AudioSink, ManualClock, SilentAudio, TimeSource, WallClock};
pub use codec::{DecoderFactory, MeshDecoder, MeshFrame, RawMeshDecoder, RawMeshFactory};
pub use decode_pool::{DecodePool, DecodeStats};
pub use frame_cache::FrameCache;
pub use player::{PlaybackState, Player, TickReport};
pub use stream::{Renderer, Stream, StreamStats};
