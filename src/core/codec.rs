//! Decoded mesh frames and the decode primitive seam.
//!
//! Mesh compression is opaque to the pipeline: a [`MeshDecoder`] takes one
//! frame-data [`Chunk`] and returns one [`MeshFrame`]. Each decode worker owns
//! its own decoder instance, built by a [`DecoderFactory`] from the sequence
//! info.
//!
//! [`RawMeshDecoder`] is the bundled implementation for uncompressed payloads
//! (the layout written by [`crate::format::writer`]):
//!
//! ```text
//! u32 frame, u32 vertex_count, u32 face_count, u32 texture_len
//! f32[3 * vertex_count]  positions
//! u32[3 * face_count]    triangle indices
//! f32[2 * vertex_count]  uvs
//! f32[3 * vertex_count]  normals
//! u8[texture_len]        texture
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::DecodeError;
use crate::format::record::Chunk;
use crate::format::sequence::SequenceInfo;

/// Codec id carried by raw mesh chunks.
pub const RAW_CODEC: u16 = 0x5257;

const RAW_HEADER_LEN: u64 = 16;

/// One fully decoded, render-ready frame.
///
/// Buffers are owned and moved, never shared: worker -> cache -> player -> dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshFrame {
    pub frame_index: u32,
    pub vertices: Vec<f32>,
    pub faces: Vec<u32>,
    pub uvs: Vec<f32>,
    pub normals: Vec<f32>,
    pub texture: Vec<u8>,
}

impl MeshFrame {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn face_count(&self) -> usize {
        self.faces.len() / 3
    }

    /// Heap bytes held by this frame.
    pub fn byte_size(&self) -> usize {
        (self.vertices.len() + self.uvs.len() + self.normals.len()) * 4
            + self.faces.len() * 4
            + self.texture.len()
    }

    /// Raw views for GPU upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn face_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.faces)
    }

    pub fn uv_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.uvs)
    }

    pub fn normal_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.normals)
    }
}

/// Turns one frame-data chunk into one mesh.
pub trait MeshDecoder: Send {
    fn decode(&mut self, chunk: &Chunk) -> Result<MeshFrame, DecodeError>;
}

/// Builds one decoder per worker.
pub trait DecoderFactory: Send + Sync {
    fn create(&self, info: &SequenceInfo) -> Box<dyn MeshDecoder>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&SequenceInfo) -> Box<dyn MeshDecoder> + Send + Sync,
{
    fn create(&self, info: &SequenceInfo) -> Box<dyn MeshDecoder> {
        self(info)
    }
}

/// Factory for [`RawMeshDecoder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RawMeshFactory;

impl DecoderFactory for RawMeshFactory {
    fn create(&self, info: &SequenceInfo) -> Box<dyn MeshDecoder> {
        Box::new(RawMeshDecoder::new(info))
    }
}

/// Decoder for uncompressed mesh payloads.
#[derive(Debug, Clone)]
pub struct RawMeshDecoder {
    max_vertices: u32,
    max_triangles: u32,
}

impl RawMeshDecoder {
    pub fn new(info: &SequenceInfo) -> Self {
        Self {
            max_vertices: info.max_vertices,
            max_triangles: info.max_triangles,
        }
    }
}

impl MeshDecoder for RawMeshDecoder {
    fn decode(&mut self, chunk: &Chunk) -> Result<MeshFrame, DecodeError> {
        if chunk.codec != RAW_CODEC {
            return Err(DecodeError::Unsupported {
                record_type: chunk.record_type,
                codec: chunk.codec,
            });
        }

        let payload = &chunk.payload[..];
        let mut rdr = Cursor::new(payload);
        let mut header = [0u32; 4];
        rdr.read_u32_into::<LittleEndian>(&mut header)
            .map_err(|_| DecodeError::Malformed(format!("{} byte payload has no mesh header", payload.len())))?;
        let [frame, nv, nf, tex_len] = header;

        if self.max_vertices > 0 && nv > self.max_vertices {
            return Err(DecodeError::LimitExceeded {
                frame,
                detail: format!("{} vertices > {}", nv, self.max_vertices),
            });
        }
        if self.max_triangles > 0 && nf > self.max_triangles {
            return Err(DecodeError::LimitExceeded {
                frame,
                detail: format!("{} triangles > {}", nf, self.max_triangles),
            });
        }

        let expected = RAW_HEADER_LEN + nv as u64 * (12 + 8 + 12) + nf as u64 * 12 + tex_len as u64;
        if payload.len() as u64 != expected {
            return Err(DecodeError::Malformed(format!(
                "frame {}: payload is {} bytes, layout needs {}",
                frame,
                payload.len(),
                expected
            )));
        }

        let mut mesh = MeshFrame {
            frame_index: frame,
            vertices: vec![0.0; nv as usize * 3],
            faces: vec![0; nf as usize * 3],
            uvs: vec![0.0; nv as usize * 2],
            normals: vec![0.0; nv as usize * 3],
            texture: vec![0; tex_len as usize],
        };

        let malformed = |e: std::io::Error| DecodeError::Malformed(format!("frame {frame}: {e}"));
        rdr.read_f32_into::<LittleEndian>(&mut mesh.vertices).map_err(malformed)?;
        rdr.read_u32_into::<LittleEndian>(&mut mesh.faces).map_err(malformed)?;
        rdr.read_f32_into::<LittleEndian>(&mut mesh.uvs).map_err(malformed)?;
        rdr.read_f32_into::<LittleEndian>(&mut mesh.normals).map_err(malformed)?;
        rdr.read_exact(&mut mesh.texture).map_err(malformed)?;

        if let Some(&bad) = mesh.faces.iter().find(|&&i| i >= nv) {
            return Err(DecodeError::Malformed(format!(
                "frame {frame}: face index {bad} out of {nv} vertices"
            )));
        }

        Ok(mesh)
    }
}

/// Serialize a mesh in the raw layout.
pub fn encode_raw(mesh: &MeshFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(RAW_HEADER_LEN as usize + mesh.byte_size());
    let _ = out.write_u32::<LittleEndian>(mesh.frame_index);
    let _ = out.write_u32::<LittleEndian>(mesh.vertex_count() as u32);
    let _ = out.write_u32::<LittleEndian>(mesh.face_count() as u32);
    let _ = out.write_u32::<LittleEndian>(mesh.texture.len() as u32);
    for &v in &mesh.vertices {
        let _ = out.write_f32::<LittleEndian>(v);
    }
    for &i in &mesh.faces {
        let _ = out.write_u32::<LittleEndian>(i);
    }
    for &v in mesh.uvs.iter().chain(&mesh.normals) {
        let _ = out.write_f32::<LittleEndian>(v);
    }
    out.extend_from_slice(&mesh.texture);
    out
}

/// A small deterministic mesh for frame `index`: one quad, positions offset by the index.
pub fn synthetic_mesh(index: u32, texture_len: usize) -> MeshFrame {
    let x = index as f32;
    MeshFrame {
        frame_index: index,
        vertices: vec![x, 0.0, 0.0, x + 1.0, 0.0, 0.0, x + 1.0, 1.0, 0.0, x, 1.0, 0.0],
        faces: vec![0, 1, 2, 0, 2, 3],
        uvs: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0],
        normals: [0.0, 0.0, 1.0].repeat(4),
        texture: (0..texture_len).map(|i| (i as u32 ^ index) as u8).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::record::{RecordHeader, kind};

    fn info(max_vertices: u32, max_triangles: u32) -> SequenceInfo {
        SequenceInfo {
            frame_count: 1,
            bloc_count: 1,
            frame_rate: 30.0,
            max_vertices,
            max_triangles,
            texture_encoding: 0,
            texture_width: 0,
            texture_height: 0,
            additional_tracks: 0,
        }
    }

    fn chunk(codec: u16, payload: Vec<u8>) -> Chunk {
        let header = RecordHeader {
            record_type: kind::FRAME_KEY,
            codec,
            version: 1,
            size: payload.len() as u32,
        };
        Chunk::new(header, 0, payload.into())
    }

    #[test]
    fn test_raw_decode() {
        let mesh = synthetic_mesh(7, 16);
        let mut dec = RawMeshDecoder::new(&info(0, 0));
        let out = dec.decode(&chunk(RAW_CODEC, encode_raw(&mesh))).unwrap();
        assert_eq!(out, mesh);
        assert_eq!(out.vertex_count(), 4);
        assert_eq!(out.face_count(), 2);
        assert_eq!(out.vertex_bytes().len(), 48);
    }

    #[test]
    fn test_unknown_codec() {
        let mut dec = RawMeshDecoder::new(&info(0, 0));
        let err = dec.decode(&chunk(9, encode_raw(&synthetic_mesh(0, 0)))).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { codec: 9, .. }));
    }

    #[test]
    fn test_limits_enforced() {
        let payload = encode_raw(&synthetic_mesh(3, 0));
        let mut dec = RawMeshDecoder::new(&info(2, 0));
        let err = dec.decode(&chunk(RAW_CODEC, payload.clone())).unwrap_err();
        assert!(matches!(err, DecodeError::LimitExceeded { frame: 3, .. }));

        let mut dec = RawMeshDecoder::new(&info(4, 1));
        assert!(dec.decode(&chunk(RAW_CODEC, payload)).is_err());
    }

    #[test]
    fn test_truncated_payload() {
        let mut payload = encode_raw(&synthetic_mesh(1, 4));
        payload.truncate(payload.len() - 1);
        let mut dec = RawMeshDecoder::new(&info(0, 0));
        assert!(matches!(
            dec.decode(&chunk(RAW_CODEC, payload)),
            Err(DecodeError::Malformed(_))
        ));
        assert!(dec.decode(&chunk(RAW_CODEC, vec![1, 2])).is_err());
    }

    #[test]
    fn test_face_index_out_of_range() {
        let mut mesh = synthetic_mesh(0, 0);
        mesh.faces[5] = 9;
        let mut dec = RawMeshDecoder::new(&info(0, 0));
        assert!(dec.decode(&chunk(RAW_CODEC, encode_raw(&mesh))).is_err());
    }

    #[test]
    fn test_closure_factory() {
        let factory = |i: &SequenceInfo| -> Box<dyn MeshDecoder> { Box::new(RawMeshDecoder::new(i)) };
        let mut dec = factory.create(&info(0, 0));
        assert!(dec.decode(&chunk(RAW_CODEC, encode_raw(&synthetic_mesh(2, 0)))).is_ok());
    }
}
