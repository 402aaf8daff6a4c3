//! Fixed file header.
//!
//! ```text
//! offset  type  field
//! 0       [4]   magic (not validated)
//! 4       i16   version
//! 6       i32   sequence-info pointer
//! 10      i32   sequence-info pointer, part 2 (unused)
//! 14      i32   bloc-index pointer
//! 18      i32   bloc-index pointer, part 2 (unused)
//! 22      i32   track-index pointer
//! 26      i32   track-index pointer, part 2 (unused)
//! 30      [4]   reserved (written, never read)
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::FormatError;

/// Bytes the parser needs from the start of the file.
pub const HEADER_READ_LEN: usize = 30;

/// Bytes the writer emits, including the reserved tail.
pub const HEADER_DISK_LEN: usize = 34;

pub const MAGIC: [u8; 4] = *b"4DS\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: [u8; 4],
    pub version: i16,
    pub sequence_info_pos: u64,
    pub bloc_index_pos: u64,
    pub track_index_pos: u64,
}

impl FileHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_READ_LEN {
            return Err(FormatError::TruncatedHeader {
                available: buf.len(),
                needed: HEADER_READ_LEN,
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);

        let mut rdr = Cursor::new(&buf[4..HEADER_READ_LEN]);
        let version = rdr.read_i16::<LittleEndian>().unwrap_or_default();
        let seq = rdr.read_i32::<LittleEndian>().unwrap_or_default();
        let _seq_part2 = rdr.read_i32::<LittleEndian>().unwrap_or_default();
        let bloc = rdr.read_i32::<LittleEndian>().unwrap_or_default();
        let _bloc_part2 = rdr.read_i32::<LittleEndian>().unwrap_or_default();
        let track = rdr.read_i32::<LittleEndian>().unwrap_or_default();

        Ok(Self {
            magic,
            version,
            sequence_info_pos: pointer("sequence_info", seq)?,
            bloc_index_pos: pointer("bloc_index", bloc)?,
            track_index_pos: pointer("track_index", track)?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic);
        let _ = out.write_i16::<LittleEndian>(self.version);
        for pos in [self.sequence_info_pos, self.bloc_index_pos, self.track_index_pos] {
            let _ = out.write_i32::<LittleEndian>(pos as i32);
            let _ = out.write_i32::<LittleEndian>(0);
        }
        out.extend_from_slice(&[0u8; HEADER_DISK_LEN - HEADER_READ_LEN]);
    }
}

fn pointer(field: &'static str, value: i32) -> Result<u64, FormatError> {
    if value < 0 {
        return Err(FormatError::NegativePointer { field, value });
    }
    Ok(value as u64)
}
