//! Bulk-range demultiplexer.
//!
//! One HTTP range response covers many records. `demux` walks it sub-header by
//! sub-header and slices each payload out without copying. Only frame-data
//! records are returned; bloc tables and unknown types are skipped.

use bytes::Bytes;
use log::trace;

use crate::error::FormatError;
use crate::format::record::{Chunk, RECORD_HEADER_LEN, RecordHeader, RecordKind};

/// Result of walking one contiguous byte range.
#[derive(Debug, Default)]
pub struct Demuxed {
    /// Frame-data chunks in container order.
    pub chunks: Vec<Chunk>,
    /// Non-frame records skipped (bloc tables, unknown types, stray structural records).
    pub skipped: usize,
    /// Bytes left over after the last complete record (fewer than a sub-header).
    pub trailing: usize,
}

/// Split `data`, which starts at absolute file offset `range_start`, into records.
///
/// A tail shorter than a sub-header is end-of-range. A record whose declared
/// size runs past the end of `data` is corruption and fails the whole range.
pub fn demux(range_start: u64, data: &Bytes) -> Result<Demuxed, FormatError> {
    let mut out = Demuxed::default();
    let mut pos = 0usize;

    while data.len() - pos >= RECORD_HEADER_LEN {
        let offset = range_start + pos as u64;
        let header = RecordHeader::parse(&data[pos..], offset)?;
        let body_start = pos + RECORD_HEADER_LEN;
        let available = data.len() - body_start;

        if header.size as usize > available {
            return Err(FormatError::RecordOverrun {
                offset,
                declared: header.size,
                available,
            });
        }

        let body_end = body_start + header.size as usize;
        if header.kind() == RecordKind::FrameData {
            out.chunks
                .push(Chunk::new(header, offset, data.slice(body_start..body_end)));
        } else {
            trace!(
                "demux: skipping record type {} ({} bytes) at {}",
                header.record_type, header.size, offset
            );
            out.skipped += 1;
        }
        pos = body_end;
    }

    out.trailing = data.len() - pos;
    Ok(out)
}
