//! Container authoring.
//!
//! Produces byte-exact 4DS containers: used by the `synth` command and by the
//! tests, which need containers with known layout.
//!
//! ```text
//! 0        file header (34 bytes)
//! 34       sequence info record
//! 79       bloc 0: bloc table record, key frame record, inter frame records
//! ...      bloc 1..n
//! P        bloc index record            <- header bloc-index pointer
//! ...      track index record           <- header track-index pointer
//! ...      audio track record (optional)
//! ```

use bytes::Bytes;

use crate::core::codec::{MeshFrame, RAW_CODEC, encode_raw, synthetic_mesh};
use crate::error::FormatError;
use crate::format::header::{FileHeader, HEADER_DISK_LEN, MAGIC};
use crate::format::record::{RECORD_HEADER_LEN, RecordHeader, kind};
use crate::format::sequence::{BLOC_ENTRY_LEN, BLOC_TABLE_ENTRY_LEN, BlocInfo, SequenceInfo, TRACK_ENTRY_LEN, write_bloc_index};

pub const FORMAT_VERSION: i16 = 3;
pub const AUDIO_CODEC: u16 = 0;

struct PendingFrame {
    codec: u16,
    payload: Vec<u8>,
}

/// A finished container plus the layout it was written with.
#[derive(Debug, Clone)]
pub struct Container {
    pub bytes: Bytes,
    pub header: FileHeader,
    pub info: SequenceInfo,
    pub blocs: Vec<BlocInfo>,
    /// Absolute offset of each frame record's sub-header, by frame index.
    pub frame_offsets: Vec<u64>,
}

impl Container {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Accumulates frames and writes them out as one container.
pub struct SequenceBuilder {
    frame_rate: f32,
    bloc_size: usize,
    frames: Vec<PendingFrame>,
    audio: Option<Vec<u8>>,
    max_vertices: u32,
    max_triangles: u32,
    texture_encoding: u32,
    texture_size: (u32, u32),
}

impl SequenceBuilder {
    pub fn new(frame_rate: f32) -> Self {
        Self {
            frame_rate,
            bloc_size: 10,
            frames: Vec::new(),
            audio: None,
            max_vertices: 0,
            max_triangles: 0,
            texture_encoding: 0,
            texture_size: (0, 0),
        }
    }

    /// Frames per bloc (one key frame plus `n - 1` inter frames).
    pub fn bloc_size(mut self, n: usize) -> Self {
        self.bloc_size = n.max(1);
        self
    }

    pub fn texture(mut self, encoding: u32, width: u32, height: u32) -> Self {
        self.texture_encoding = encoding;
        self.texture_size = (width, height);
        self
    }

    pub fn audio(mut self, bytes: Vec<u8>) -> Self {
        self.audio = Some(bytes);
        self
    }

    pub fn push_mesh(&mut self, mesh: &MeshFrame) {
        self.max_vertices = self.max_vertices.max(mesh.vertex_count() as u32);
        self.max_triangles = self.max_triangles.max(mesh.face_count() as u32);
        self.frames.push(PendingFrame {
            codec: RAW_CODEC,
            payload: encode_raw(mesh),
        });
    }

    /// Add a frame with an arbitrary codec and payload.
    pub fn push_encoded(&mut self, codec: u16, payload: Vec<u8>) {
        self.frames.push(PendingFrame { codec, payload });
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn build(&self) -> Result<Container, FormatError> {
        if self.frames.is_empty() {
            return Err(FormatError::InvalidSequence("no frames".into()));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(FormatError::InvalidSequence(format!("frame rate {}", self.frame_rate)));
        }

        let bloc_count = self.frames.len().div_ceil(self.bloc_size);
        let info = SequenceInfo {
            frame_count: self.frames.len() as u32,
            bloc_count: bloc_count as u32,
            frame_rate: self.frame_rate,
            max_vertices: self.max_vertices,
            max_triangles: self.max_triangles,
            texture_encoding: self.texture_encoding,
            texture_width: self.texture_size.0,
            texture_height: self.texture_size.1,
            additional_tracks: self.audio.is_some() as u32,
        };

        // Header is patched once the trailing pointers are known.
        let mut out = vec![0u8; HEADER_DISK_LEN];
        let sequence_info_pos = out.len() as u64;
        let mut payload = Vec::new();
        info.write_to(&mut payload);
        write_record(&mut out, kind::SEQUENCE_INFO, 0, &payload);

        let mut blocs = Vec::with_capacity(bloc_count);
        let mut frame_offsets = Vec::with_capacity(self.frames.len());
        for (b, group) in self.frames.chunks(self.bloc_size).enumerate() {
            let key_frame_id = b * self.bloc_size;
            let bloc_pos = out.len() as u64;
            blocs.push(BlocInfo {
                key_frame_id: to_i32(key_frame_id as u64)?,
                inter_frame_count: (group.len() - 1) as i32,
                byte_offset: to_i32(bloc_pos)?,
            });

            // Bloc table: a summary entry, then one entry per frame.
            let table_len = (group.len() + 1) * BLOC_TABLE_ENTRY_LEN;
            let mut frame_pos = bloc_pos + (RECORD_HEADER_LEN + table_len) as u64;
            let mut table = Vec::with_capacity(table_len);
            table_entry(&mut table, [key_frame_id as u32, group.len() as u32, 0, 0]);
            for (i, f) in group.iter().enumerate() {
                let record_type = frame_type(i);
                table_entry(
                    &mut table,
                    [(key_frame_id + i) as u32, frame_pos as u32, f.payload.len() as u32, record_type as u32],
                );
                frame_pos += (RECORD_HEADER_LEN + f.payload.len()) as u64;
            }
            write_record(&mut out, kind::BLOC_TABLE, 0, &table);

            for (i, f) in group.iter().enumerate() {
                frame_offsets.push(out.len() as u64);
                write_record(&mut out, frame_type(i), f.codec, &f.payload);
            }
        }

        let bloc_index_pos = out.len() as u64;
        let mut payload = Vec::with_capacity(bloc_count * BLOC_ENTRY_LEN);
        write_bloc_index(&blocs, &mut payload);
        write_record(&mut out, kind::BLOC_INDEX, 0, &payload);

        let track_index_pos = out.len() as u64;
        let mut payload = Vec::with_capacity(info.additional_tracks as usize * TRACK_ENTRY_LEN);
        if self.audio.is_some() {
            let audio_pos = track_index_pos + (RECORD_HEADER_LEN + TRACK_ENTRY_LEN) as u64;
            payload.extend_from_slice(&to_i32(audio_pos)?.to_le_bytes());
            payload.extend_from_slice(&[0u8; TRACK_ENTRY_LEN - 4]);
        }
        write_record(&mut out, kind::TRACK_INDEX, 0, &payload);

        if let Some(audio) = &self.audio {
            write_record(&mut out, kind::AUDIO_TRACK, AUDIO_CODEC, audio);
        }
        to_i32(out.len() as u64)?;

        let header = FileHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
            sequence_info_pos,
            bloc_index_pos,
            track_index_pos,
        };
        let mut head = Vec::with_capacity(HEADER_DISK_LEN);
        header.write_to(&mut head);
        out[..HEADER_DISK_LEN].copy_from_slice(&head);

        Ok(Container {
            bytes: Bytes::from(out),
            header,
            info,
            blocs,
            frame_offsets,
        })
    }
}

/// Build a container of `frames` synthetic quads.
pub fn synthesize(
    frames: u32,
    frame_rate: f32,
    bloc_size: usize,
    texture_len: usize,
) -> Result<Container, FormatError> {
    let mut builder = SequenceBuilder::new(frame_rate).bloc_size(bloc_size);
    for i in 0..frames {
        builder.push_mesh(&synthetic_mesh(i, texture_len));
    }
    builder.build()
}

fn frame_type(index_in_bloc: usize) -> u8 {
    if index_in_bloc == 0 {
        kind::FRAME_KEY
    } else {
        kind::FRAME_INTER
    }
}

fn write_record(out: &mut Vec<u8>, record_type: u8, codec: u16, payload: &[u8]) {
    RecordHeader {
        record_type,
        codec,
        version: 1,
        size: payload.len() as u32,
    }
    .write_to(out);
    out.extend_from_slice(payload);
}

fn table_entry(out: &mut Vec<u8>, fields: [u32; 4]) {
    for f in fields {
        out.extend_from_slice(&f.to_le_bytes());
    }
}

fn to_i32(v: u64) -> Result<i32, FormatError> {
    i32::try_from(v).map_err(|_| FormatError::InvalidSequence(format!("offset {v} does not fit the format")))
}
