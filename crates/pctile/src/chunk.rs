//! Bounded chunk views over pooled buffers.
//!
//! A `Chunk` is a transient window into one buffer's live region,
//! holding a whole number of fixed-size point records. Pipeline stages
//! consume a chunk and hand back the same view or a front-clamped
//! shorter one; records are reached through stride iteration over the
//! slice, never through pointer arithmetic, so a stage cannot walk past
//! the validated length.

use crate::geom::quant::QuantizedPoint;

/// Quantized records lead with three little-endian i32 coordinates.
pub const QUANTIZED_XYZ_SIZE: usize = 12;

/// Raw records lead with three little-endian f64 coordinates.
pub const RAW_XYZ_SIZE: usize = 24;

/// How the leading bytes of each record encode a coordinate triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// `i32 x, y, z` on a quantization lattice.
    Quantized,
    /// `f64 x, y, z` in real units.
    Raw,
}

impl RecordLayout {
    #[inline]
    pub fn coordinate_size(self) -> usize {
        match self {
            RecordLayout::Quantized => QUANTIZED_XYZ_SIZE,
            RecordLayout::Raw => RAW_XYZ_SIZE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordLayout::Quantized => "quantized i32",
            RecordLayout::Raw => "raw f64",
        }
    }
}

#[inline]
pub fn decode_quantized(record: &[u8]) -> QuantizedPoint {
    QuantizedPoint {
        x: i32::from_le_bytes(record[0..4].try_into().unwrap()),
        y: i32::from_le_bytes(record[4..8].try_into().unwrap()),
        z: i32::from_le_bytes(record[8..12].try_into().unwrap()),
    }
}

#[inline]
pub fn encode_quantized(record: &mut [u8], p: QuantizedPoint) {
    record[0..4].copy_from_slice(&p.x.to_le_bytes());
    record[4..8].copy_from_slice(&p.y.to_le_bytes());
    record[8..12].copy_from_slice(&p.z.to_le_bytes());
}

#[inline]
pub fn decode_raw(record: &[u8]) -> [f64; 3] {
    [
        f64::from_le_bytes(record[0..8].try_into().unwrap()),
        f64::from_le_bytes(record[8..16].try_into().unwrap()),
        f64::from_le_bytes(record[16..24].try_into().unwrap()),
    ]
}

#[inline]
pub fn encode_raw(record: &mut [u8], p: [f64; 3]) {
    record[0..8].copy_from_slice(&p[0].to_le_bytes());
    record[8..16].copy_from_slice(&p[1].to_le_bytes());
    record[16..24].copy_from_slice(&p[2].to_le_bytes());
}

/// A window of `point_count` records of `point_size` bytes each, plus
/// the chunk's position in the input (`index`) and overall progress.
pub struct Chunk<'a> {
    data: &'a mut [u8],
    point_size: usize,
    point_count: usize,
    index: u32,
    progress: f32,
}

impl<'a> Chunk<'a> {
    pub fn new(data: &'a mut [u8], point_size: usize, index: u32, progress: f32) -> Self {
        assert!(point_size > 0);
        assert!(
            data.len() % point_size == 0,
            "chunk length {} is not a multiple of the record size {}",
            data.len(),
            point_size
        );
        let point_count = data.len() / point_size;
        Self {
            data,
            point_size,
            point_count,
            index,
            progress,
        }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    #[inline]
    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// Index of this chunk within the input stream's chunk sequence.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Fraction of the source consumed once this chunk is processed.
    #[inline]
    pub fn progress(&self) -> f32 {
        self.progress
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.data
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data
    }

    /// Stride iteration over the records.
    #[inline]
    pub fn records(&self) -> std::slice::ChunksExact<'_, u8> {
        self.data.chunks_exact(self.point_size)
    }

    #[inline]
    pub fn records_mut(&mut self) -> std::slice::ChunksExactMut<'_, u8> {
        self.data.chunks_exact_mut(self.point_size)
    }

    /// Clamps the view to the first `point_count` records of the same
    /// buffer region; used after in-place compaction. Never grows.
    pub fn shrink(self, point_count: usize) -> Chunk<'a> {
        assert!(point_count <= self.point_count);
        Chunk {
            data: &mut self.data[..point_count * self.point_size],
            point_size: self.point_size,
            point_count,
            index: self.index,
            progress: self.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_iterate_by_stride() {
        let mut data = [0u8; 36];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let chunk = Chunk::new(&mut data, 12, 0, 0.5);
        assert_eq!(chunk.point_count(), 3);
        let recs: Vec<_> = chunk.records().collect();
        assert_eq!(recs.len(), 3);
        assert_eq!(recs[1][0], 12);
    }

    #[test]
    fn quantized_codec_roundtrip() {
        let mut rec = [0u8; 16]; // record larger than the coordinate triple
        let p = QuantizedPoint {
            x: -5,
            y: 1 << 30,
            z: 42,
        };
        encode_quantized(&mut rec, p);
        assert_eq!(decode_quantized(&rec), p);
    }

    #[test]
    fn shrink_keeps_front_of_buffer() {
        let mut data = [7u8; 48];
        let chunk = Chunk::new(&mut data, 12, 3, 1.0);
        let shrunk = chunk.shrink(2);
        assert_eq!(shrunk.point_count(), 2);
        assert_eq!(shrunk.bytes().len(), 24);
        assert_eq!(shrunk.index(), 3);
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn rejects_partial_records() {
        let mut data = [0u8; 30];
        let _ = Chunk::new(&mut data, 12, 0, 0.0);
    }
}
