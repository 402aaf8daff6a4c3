//! Sequence-level structural records: sequence info, bloc index, track index.
//!
//! [`SequenceIndex`] is the immutable result of opening a container. It is
//! built once per loaded sequence and drives every size-dependent buffer
//! downstream (chunk queue ceiling, decode limits, streaming bounds).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::FormatError;
use crate::format::header::FileHeader;

/// Size of the sequence-info payload.
pub const SEQUENCE_INFO_LEN: usize = 36;
/// Size of one bloc-index entry; only the first 12 bytes carry data.
pub const BLOC_ENTRY_LEN: usize = 16;
/// Size of one track-index entry; only the first 4 bytes carry data.
pub const TRACK_ENTRY_LEN: usize = 8;
/// Size of one per-frame entry inside a bloc table record.
pub const BLOC_TABLE_ENTRY_LEN: usize = 16;

/// Hard upper bound on resident undecoded chunks, independent of file size.
pub const MAX_CHUNK_CEILING: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SequenceInfo {
    pub frame_count: u32,
    pub bloc_count: u32,
    pub frame_rate: f32,
    pub max_vertices: u32,
    pub max_triangles: u32,
    pub texture_encoding: u32,
    pub texture_width: u32,
    pub texture_height: u32,
    pub additional_tracks: u32,
}

impl SequenceInfo {
    pub fn parse(buf: &[u8], offset: u64) -> Result<Self, FormatError> {
        if buf.len() < SEQUENCE_INFO_LEN {
            return Err(FormatError::TruncatedRecord {
                offset,
                available: buf.len(),
                needed: SEQUENCE_INFO_LEN,
            });
        }
        let mut rdr = Cursor::new(buf);
        let mut u32_field = || rdr.read_u32::<LittleEndian>().unwrap_or_default();
        let frame_count = u32_field();
        let bloc_count = u32_field();
        let frame_rate = f32::from_bits(u32_field());
        let info = Self {
            frame_count,
            bloc_count,
            frame_rate,
            max_vertices: u32_field(),
            max_triangles: u32_field(),
            texture_encoding: u32_field(),
            texture_width: u32_field(),
            texture_height: u32_field(),
            additional_tracks: u32_field(),
        };
        info.validate()?;
        Ok(info)
    }

    fn validate(&self) -> Result<(), FormatError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(FormatError::InvalidSequence(format!(
                "frame rate {} is not positive",
                self.frame_rate
            )));
        }
        if self.frame_count == 0 {
            return Err(FormatError::InvalidSequence("zero frames".into()));
        }
        if self.bloc_count == 0 {
            return Err(FormatError::InvalidSequence("zero blocs".into()));
        }
        Ok(())
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        let _ = out.write_u32::<LittleEndian>(self.frame_count);
        let _ = out.write_u32::<LittleEndian>(self.bloc_count);
        let _ = out.write_f32::<LittleEndian>(self.frame_rate);
        for v in [
            self.max_vertices,
            self.max_triangles,
            self.texture_encoding,
            self.texture_width,
            self.texture_height,
            self.additional_tracks,
        ] {
            let _ = out.write_u32::<LittleEndian>(v);
        }
    }

    /// Sequence duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frame_count as f64 / self.frame_rate as f64
    }

    /// Chunk queue ceiling: `min(2 x frames, 300)`.
    pub fn chunk_ceiling(&self) -> usize {
        (self.frame_count as usize * 2).min(MAX_CHUNK_CEILING)
    }
}

/// One key-frame group: a key frame plus its dependent inter-frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocInfo {
    pub key_frame_id: i32,
    pub inter_frame_count: i32,
    pub byte_offset: i32,
}

impl BlocInfo {
    pub fn frame_count(&self) -> u32 {
        (self.inter_frame_count.max(0) + 1) as u32
    }
}

pub fn parse_bloc_index(buf: &[u8], bloc_count: u32, offset: u64) -> Result<Vec<BlocInfo>, FormatError> {
    let needed = bloc_count as usize * BLOC_ENTRY_LEN;
    if buf.len() < needed {
        return Err(FormatError::TruncatedRecord {
            offset,
            available: buf.len(),
            needed,
        });
    }

    let mut blocs = Vec::with_capacity(bloc_count as usize);
    for entry in buf[..needed].chunks_exact(BLOC_ENTRY_LEN) {
        let mut rdr = Cursor::new(entry);
        let bloc = BlocInfo {
            key_frame_id: rdr.read_i32::<LittleEndian>().unwrap_or_default(),
            inter_frame_count: rdr.read_i32::<LittleEndian>().unwrap_or_default(),
            byte_offset: rdr.read_i32::<LittleEndian>().unwrap_or_default(),
        };
        if bloc.key_frame_id < 0 || bloc.inter_frame_count < 0 || bloc.byte_offset < 0 {
            return Err(FormatError::InvalidBlocIndex(format!(
                "negative field in bloc {}: {:?}",
                blocs.len(),
                bloc
            )));
        }
        blocs.push(bloc);
    }
    Ok(blocs)
}

pub fn write_bloc_index(blocs: &[BlocInfo], out: &mut Vec<u8>) {
    for b in blocs {
        let _ = out.write_i32::<LittleEndian>(b.key_frame_id);
        let _ = out.write_i32::<LittleEndian>(b.inter_frame_count);
        let _ = out.write_i32::<LittleEndian>(b.byte_offset);
        let _ = out.write_i32::<LittleEndian>(0);
    }
}

/// Absolute positions of the additional-track records.
pub fn parse_track_index(buf: &[u8], track_count: u32, offset: u64) -> Result<Vec<u64>, FormatError> {
    let needed = track_count as usize * TRACK_ENTRY_LEN;
    if buf.len() < needed {
        return Err(FormatError::TruncatedRecord {
            offset,
            available: buf.len(),
            needed,
        });
    }
    buf[..needed]
        .chunks_exact(TRACK_ENTRY_LEN)
        .map(|entry| {
            let pos = i32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            if pos < 0 {
                Err(FormatError::InvalidSequence(format!("negative track position {pos}")))
            } else {
                Ok(pos as u64)
            }
        })
        .collect()
}

/// Everything learned from the structural records of one container.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceIndex {
    pub header: FileHeader,
    pub info: SequenceInfo,
    pub blocs: Vec<BlocInfo>,
    /// Bloc byte boundaries: bloc `i` spans `bounds[i]..bounds[i + 1]`.
    /// The last bloc ends where the bloc index record starts.
    bounds: Vec<u64>,
}

impl SequenceIndex {
    pub fn new(header: FileHeader, info: SequenceInfo, blocs: Vec<BlocInfo>) -> Result<Self, FormatError> {
        if blocs.len() != info.bloc_count as usize {
            return Err(FormatError::InvalidBlocIndex(format!(
                "{} entries for {} blocs",
                blocs.len(),
                info.bloc_count
            )));
        }

        let mut bounds: Vec<u64> = blocs.iter().map(|b| b.byte_offset as u64).collect();
        bounds.push(header.bloc_index_pos);

        if let Some(i) = bounds.windows(2).position(|w| w[0] >= w[1]) {
            return Err(FormatError::InvalidBlocIndex(format!(
                "bloc {} bounds not increasing: {} >= {}",
                i,
                bounds[i],
                bounds[i + 1]
            )));
        }

        // bloc_for_frame binary-searches on key frames
        if let Some(i) = blocs.windows(2).position(|w| w[0].key_frame_id >= w[1].key_frame_id) {
            return Err(FormatError::InvalidBlocIndex(format!(
                "bloc {} key frame {} not after {}",
                i + 1,
                blocs[i + 1].key_frame_id,
                blocs[i].key_frame_id
            )));
        }

        Ok(Self {
            header,
            info,
            blocs,
            bounds,
        })
    }

    pub fn bloc_count(&self) -> usize {
        self.blocs.len()
    }

    /// Byte range `[start, end)` of bloc `i`.
    pub fn bloc_bounds(&self, i: usize) -> (u64, u64) {
        (self.bounds[i], self.bounds[i + 1])
    }

    pub fn bloc_len(&self, i: usize) -> u64 {
        self.bounds[i + 1] - self.bounds[i]
    }

    /// Bloc containing `frame`: the last bloc whose key frame is at or before it.
    pub fn bloc_for_frame(&self, frame: u32) -> usize {
        let idx = self.blocs.partition_point(|b| b.key_frame_id as i64 <= frame as i64);
        idx.saturating_sub(1)
    }

    pub fn duration(&self) -> f64 {
        self.info.duration()
    }
}
