//! 4DS container format: header, records, structural indexes, demux and authoring.

pub mod demux;
pub mod header;
pub mod record;
pub mod sequence;
pub mod writer;

pub use demux::{Demuxed, demux};
pub use header::FileHeader;
pub use record::{Chunk, RecordHeader, RecordKind};
pub use sequence::{BlocInfo, SequenceIndex, SequenceInfo};
