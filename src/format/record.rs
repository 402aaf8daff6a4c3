//! Record sub-header and the typed chunks it introduces.
//!
//! Every record in a 4DS container starts with the same 9-byte little-endian
//! sub-header:
//!
//! ```text
//! offset  size  field
//! 0       1     type     (u8)
//! 1       2     codec    (u16)
//! 3       2     version  (u16)
//! 5       4     size     (u32, payload bytes that follow)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::io::Cursor;

use crate::error::FormatError;

/// Size of the record sub-header in bytes.
pub const RECORD_HEADER_LEN: usize = 9;

/// Record type ids.
pub mod kind {
    pub const SEQUENCE_INFO: u8 = 1;
    pub const TRACK_INDEX: u8 = 2;
    pub const BLOC_INDEX: u8 = 3;
    /// Per-bloc frame table written at `BlocChunkPos`. Neither structural nor
    /// frame data; the pipeline skips it.
    pub const BLOC_TABLE: u8 = 4;
    pub const AUDIO_TRACK: u8 = 21;

    pub const FRAME_KEY: u8 = 10;
    pub const FRAME_INTER: u8 = 11;
    pub const FRAME_TEXTURE: u8 = 12;
    pub const FRAME_EXTENDED: u8 = 14;

    pub const FRAME_TYPES: [u8; 4] = [FRAME_KEY, FRAME_INTER, FRAME_TEXTURE, FRAME_EXTENDED];
}

/// What a record type id means to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    SequenceInfo,
    TrackIndex,
    BlocIndex,
    AudioTrack,
    FrameData,
    /// Anything else. Ignored, the format is forward-extensible.
    Other,
}

impl From<u8> for RecordKind {
    fn from(t: u8) -> Self {
        match t {
            kind::SEQUENCE_INFO => RecordKind::SequenceInfo,
            kind::TRACK_INDEX => RecordKind::TrackIndex,
            kind::BLOC_INDEX => RecordKind::BlocIndex,
            kind::AUDIO_TRACK => RecordKind::AudioTrack,
            t if kind::FRAME_TYPES.contains(&t) => RecordKind::FrameData,
            _ => RecordKind::Other,
        }
    }
}

/// Parsed 9-byte record sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: u8,
    pub codec: u16,
    pub version: u16,
    pub size: u32,
}

impl RecordHeader {
    /// Parse a sub-header from the first 9 bytes of `buf`.
    ///
    /// `offset` is the absolute file position of `buf[0]`, used for error reports only.
    pub fn parse(buf: &[u8], offset: u64) -> Result<Self, FormatError> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(FormatError::TruncatedRecord {
                offset,
                available: buf.len(),
                needed: RECORD_HEADER_LEN,
            });
        }
        let mut rdr = Cursor::new(buf);
        // Length checked above, reads cannot fail.
        let record_type = rdr.read_u8().unwrap_or_default();
        let codec = rdr.read_u16::<LittleEndian>().unwrap_or_default();
        let version = rdr.read_u16::<LittleEndian>().unwrap_or_default();
        let size = rdr.read_u32::<LittleEndian>().unwrap_or_default();
        Ok(Self {
            record_type,
            codec,
            version,
            size,
        })
    }

    pub fn kind(&self) -> RecordKind {
        RecordKind::from(self.record_type)
    }

    /// Total on-disk length: sub-header plus payload.
    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_LEN as u64 + self.size as u64
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.record_type);
        // Writes into a Vec are infallible.
        let _ = out.write_u16::<LittleEndian>(self.codec);
        let _ = out.write_u16::<LittleEndian>(self.version);
        let _ = out.write_u32::<LittleEndian>(self.size);
    }
}

/// One typed, length-prefixed record with its payload.
///
/// The payload is a reference-counted slice of the fetched range, so moving a
/// chunk through the queue and into a decode worker never copies the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub record_type: u8,
    pub codec: u16,
    pub version: u16,
    /// Absolute file offset of the sub-header.
    pub offset: u64,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(header: RecordHeader, offset: u64, payload: Bytes) -> Self {
        Self {
            record_type: header.record_type,
            codec: header.codec,
            version: header.version,
            offset,
            payload,
        }
    }

    pub fn kind(&self) -> RecordKind {
        RecordKind::from(self.record_type)
    }

    pub fn is_frame_data(&self) -> bool {
        self.kind() == RecordKind::FrameData
    }

    pub fn byte_length(&self) -> usize {
        self.payload.len()
    }
}
