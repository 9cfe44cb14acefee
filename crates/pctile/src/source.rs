//! Binary point sources and their chunk enumerators.
//!
//! A source describes a file of fixed-size point records; the format
//! readers that produce these descriptions (LAS, XYZ, ...) live
//! elsewhere. The cursor walks the record region chunk by chunk through
//! a pooled buffer, either end to end or over a sparse set of chunk
//! ranges re-read for one output segment.

use std::path::{Path, PathBuf};

use crate::arena::{BufferArena, BufferLease};
use crate::chunk::{Chunk, RecordLayout};
use crate::error::{Error, Result};
use crate::geom::extent::Extent;
use crate::geom::quant::Quantization;
use crate::stream::SequentialReader;

/// A maximal run of consecutive input chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u32,
    pub count: u32,
}

/// Description of a file of fixed-size point records.
#[derive(Debug, Clone)]
pub struct PointSource {
    path: PathBuf,
    data_offset: u64,
    count: u64,
    point_size: u16,
    extent: Extent,
    quantization: Option<Quantization>,
}

impl PointSource {
    pub fn new(
        path: impl AsRef<Path>,
        data_offset: u64,
        count: u64,
        point_size: u16,
        extent: Extent,
        quantization: Option<Quantization>,
    ) -> Result<Self> {
        let layout = if quantization.is_some() {
            RecordLayout::Quantized
        } else {
            RecordLayout::Raw
        };
        if (point_size as usize) < layout.coordinate_size() {
            return Err(Error::QuantizationMismatch {
                expected: layout.name(),
                actual: "undersized record",
            });
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            data_offset,
            count,
            point_size,
            extent,
            quantization,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[inline]
    pub fn point_size(&self) -> u16 {
        self.point_size
    }

    #[inline]
    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    #[inline]
    pub fn quantization(&self) -> Option<&Quantization> {
        self.quantization.as_ref()
    }

    #[inline]
    pub fn layout(&self) -> RecordLayout {
        if self.quantization.is_some() {
            RecordLayout::Quantized
        } else {
            RecordLayout::Raw
        }
    }

    /// Whole records per pooled buffer.
    pub fn points_per_chunk(&self, arena: &BufferArena) -> usize {
        arena.buffer_size() / self.point_size as usize
    }

    /// Number of chunks a full scan produces.
    pub fn chunk_count(&self, arena: &BufferArena) -> u32 {
        let ppc = self.points_per_chunk(arena) as u64;
        self.count.div_ceil(ppc) as u32
    }

    fn points_in_chunk(&self, chunk_index: u32, ppc: usize) -> usize {
        let start = chunk_index as u64 * ppc as u64;
        debug_assert!(start < self.count);
        (self.count - start).min(ppc as u64) as usize
    }

    /// Opens an end-to-end cursor over all chunks.
    pub fn open_cursor<'s>(&'s self, arena: &BufferArena) -> Result<ChunkCursor<'s>> {
        let chunks = self.chunk_count(arena);
        self.open_sparse_cursor(arena, &[ChunkRange { start: 0, count: chunks }])
    }

    /// Opens a cursor over the given chunk ranges only. Ranges must be
    /// sorted ascending and non-overlapping; chunk indices keep their
    /// whole-file meaning.
    pub fn open_sparse_cursor<'s>(
        &'s self,
        arena: &BufferArena,
        regions: &[ChunkRange],
    ) -> Result<ChunkCursor<'s>> {
        let ppc = self.points_per_chunk(arena);
        let mut reader = SequentialReader::open(&self.path, arena)?;
        reader.seek(self.data_offset)?;

        let planned_points: u64 = regions
            .iter()
            .flat_map(|r| r.start..r.start + r.count)
            .map(|i| self.points_in_chunk(i, ppc) as u64)
            .sum();

        Ok(ChunkCursor {
            source: self,
            reader,
            lease: arena.acquire("chunk-cursor"),
            regions: regions.to_vec(),
            region_pos: 0,
            chunk_in_region: 0,
            points_per_chunk: ppc,
            planned_points,
            points_done: 0,
        })
    }
}

/// Forward-only chunk enumerator over a `PointSource`.
pub struct ChunkCursor<'s> {
    source: &'s PointSource,
    reader: SequentialReader,
    lease: BufferLease,
    regions: Vec<ChunkRange>,
    region_pos: usize,
    chunk_in_region: u32,
    points_per_chunk: usize,
    planned_points: u64,
    points_done: u64,
}

impl<'s> ChunkCursor<'s> {
    /// Reads the next chunk, or `None` when the planned ranges are
    /// exhausted. The returned view borrows the cursor's buffer and
    /// must be dropped before the next call.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk<'_>>> {
        let point_size = self.source.point_size as usize;

        let chunk_index = loop {
            let Some(region) = self.regions.get(self.region_pos) else {
                return Ok(None);
            };
            if self.chunk_in_region < region.count {
                break region.start + self.chunk_in_region;
            }
            self.region_pos += 1;
            self.chunk_in_region = 0;
        };

        let byte_offset = self.source.data_offset
            + chunk_index as u64 * self.points_per_chunk as u64 * point_size as u64;
        if self.reader.position() != byte_offset {
            self.reader.seek(byte_offset)?;
        }

        let points = self.source.points_in_chunk(chunk_index, self.points_per_chunk);
        let bytes = points * point_size;
        self.reader.read_exact(&mut self.lease[..bytes])?;

        self.chunk_in_region += 1;
        self.points_done += points as u64;
        let progress = self.points_done as f32 / self.planned_points.max(1) as f32;

        Ok(Some(Chunk::new(
            &mut self.lease[..bytes],
            point_size,
            chunk_index,
            progress,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::encode_raw;

    fn write_raw_points(path: &Path, count: usize) {
        let mut data = vec![0u8; count * 24];
        for (i, rec) in data.chunks_exact_mut(24).enumerate() {
            encode_raw(rec, [i as f64, i as f64 * 2.0, 1.0]);
        }
        std::fs::write(path, &data).unwrap();
    }

    fn extent(n: usize) -> Extent {
        Extent::new([0.0, 0.0, 0.0], [n as f64, n as f64 * 2.0, 2.0]).unwrap()
    }

    #[test]
    fn full_scan_visits_every_point_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.bin");
        write_raw_points(&path, 1000);

        // one sector per buffer: 170 whole records per chunk
        let arena = BufferArena::new(4096);
        let source = PointSource::new(&path, 0, 1000, 24, extent(1000), None).unwrap();
        assert_eq!(source.points_per_chunk(&arena), 170);
        assert_eq!(source.chunk_count(&arena), 6);

        let mut cursor = source.open_cursor(&arena).unwrap();
        let mut seen = 0u64;
        let mut last_progress = 0.0f32;
        let mut last_index = None;
        while let Some(chunk) = cursor.next_chunk().unwrap() {
            seen += chunk.point_count() as u64;
            assert!(chunk.progress() >= last_progress);
            last_progress = chunk.progress();
            last_index = Some(chunk.index());
        }
        assert_eq!(seen, 1000);
        assert_eq!(last_index, Some(5));
        assert!((last_progress - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sparse_cursor_reads_only_requested_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.bin");
        write_raw_points(&path, 1000);

        let arena = BufferArena::new(4096);
        let source = PointSource::new(&path, 0, 1000, 24, extent(1000), None).unwrap();

        let regions = [
            ChunkRange { start: 1, count: 2 },
            ChunkRange { start: 5, count: 1 },
        ];
        let mut cursor = source.open_sparse_cursor(&arena, &regions).unwrap();
        let mut indices = Vec::new();
        let mut first_values = Vec::new();
        let mut counts = Vec::new();
        while let Some(chunk) = cursor.next_chunk().unwrap() {
            indices.push(chunk.index());
            counts.push(chunk.point_count());
            first_values.push(crate::chunk::decode_raw(chunk.records().next().unwrap())[0]);
        }
        assert_eq!(indices, vec![1, 2, 5]);
        // chunk 1 starts at point 170; chunk 5 at point 850
        assert_eq!(first_values[0], 170.0);
        assert_eq!(first_values[2], 850.0);
        // final chunk is the 150-point tail
        assert_eq!(counts, vec![170, 170, 150]);
    }

    #[test]
    fn undersized_record_is_a_layout_mismatch() {
        let e = extent(10);
        let q = Quantization::derive(&e);
        let err = PointSource::new("x.bin", 0, 10, 8, e, Some(q)).unwrap_err();
        assert!(matches!(err, Error::QuantizationMismatch { .. }));
    }
}
