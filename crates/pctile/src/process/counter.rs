//! Counting pass: per-tile point counts and the chunk-touch index.

use std::collections::BTreeSet;

use crate::chunk::{Chunk, RecordLayout};
use crate::geom::quant::{Quantization, QuantizedExtent};
use crate::grid::{CellMapper, Grid, GridDef};
use crate::process::{decode_lattice, ChunkProcess};

/// The set of input chunks that put at least one point into a cell.
///
/// Consecutive points usually stay in one cell, so membership checks
/// are short-circuited against the last chunk recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedChunks {
    chunks: BTreeSet<u32>,
    last: Option<u32>,
}

impl TouchedChunks {
    #[inline]
    pub fn add(&mut self, chunk: u32) {
        if self.last != Some(chunk) {
            self.chunks.insert(chunk);
            self.last = Some(chunk);
        }
    }

    pub fn merge(&mut self, other: TouchedChunks) {
        self.chunks.extend(other.chunks);
        self.last = None;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.chunks.iter().copied()
    }
}

/// Counts points into a tile grid, optionally recording which chunk
/// each coarse cell was touched by. Pure observer: chunks pass through
/// unmodified.
pub struct GridCounter {
    counts: Grid<u32>,
    chunk_index: Option<Grid<TouchedChunks>>,
    mapper: CellMapper,
    layout: RecordLayout,
    quantization: Quantization,
}

impl GridCounter {
    pub fn new(
        def: GridDef,
        qext: &QuantizedExtent,
        layout: RecordLayout,
        quantization: Quantization,
    ) -> Self {
        Self {
            mapper: CellMapper::new(&def, qext),
            counts: Grid::new(def, 0),
            chunk_index: None,
            layout,
            quantization,
        }
    }

    /// Enables the chunk-touch index needed for sparse segment re-reads.
    pub fn with_chunk_index(mut self) -> Self {
        self.chunk_index = Some(Grid::new(*self.counts.def(), TouchedChunks::default()));
        self
    }

    /// Corrects edge overflow and surrenders the grids.
    pub fn finish(mut self) -> (Grid<u32>, Option<Grid<TouchedChunks>>) {
        self.counts.correct_overflow();
        if let Some(index) = self.chunk_index.as_mut() {
            index.correct_overflow_with(|a, b| a.merge(b));
        }
        (self.counts, self.chunk_index)
    }
}

impl ChunkProcess for GridCounter {
    fn name(&self) -> &'static str {
        "grid-counter"
    }

    fn process<'a>(&mut self, chunk: Chunk<'a>) -> Chunk<'a> {
        let chunk_idx = chunk.index();
        for record in chunk.records() {
            let p = decode_lattice(record, self.layout, &self.quantization);
            let (row, col) = self.mapper.cell(p.x, p.y);
            *self.counts.cell_mut(row, col) += 1;
            if let Some(index) = self.chunk_index.as_mut() {
                index.cell_mut(row, col).add(chunk_idx);
            }
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::encode_quantized;
    use crate::geom::quant::QuantizedPoint;

    fn qext(side: i32) -> QuantizedExtent {
        QuantizedExtent {
            min: QuantizedPoint { x: 0, y: 0, z: 0 },
            max: QuantizedPoint {
                x: side,
                y: side,
                z: 100,
            },
        }
    }

    fn identity_quant() -> Quantization {
        Quantization::new([1.0; 3], [0.0; 3]).unwrap()
    }

    fn chunk_of(points: &[(i32, i32)]) -> Vec<u8> {
        let mut buf = vec![0u8; points.len() * 12];
        for (rec, &(x, y)) in buf.chunks_exact_mut(12).zip(points) {
            encode_quantized(rec, QuantizedPoint { x, y, z: 0 });
        }
        buf
    }

    #[test]
    fn counts_conserve_points_including_edges() {
        let def = GridDef::new_buffered(4, 4).unwrap();
        let ext = qext(1000);
        let mut counter =
            GridCounter::new(def, &ext, RecordLayout::Quantized, identity_quant());

        // one interior point, one on the max corner
        let mut data = chunk_of(&[(100, 100), (1000, 1000)]);
        counter.process(Chunk::new(&mut data, 12, 0, 0.5));

        let (counts, _) = counter.finish();
        assert_eq!(counts.total(), 2);
        assert_eq!(*counts.cell(0, 0), 1);
        assert_eq!(*counts.cell(3, 3), 1); // folded from the buffered corner
    }

    #[test]
    fn chunk_index_records_touching_chunks() {
        let def = GridDef::new_buffered(2, 2).unwrap();
        let ext = qext(1000);
        let mut counter = GridCounter::new(def, &ext, RecordLayout::Quantized, identity_quant())
            .with_chunk_index();

        let mut a = chunk_of(&[(100, 100), (900, 900)]);
        counter.process(Chunk::new(&mut a, 12, 3, 0.3));
        let mut b = chunk_of(&[(100, 100)]);
        counter.process(Chunk::new(&mut b, 12, 7, 0.6));

        let (counts, index) = counter.finish();
        let index = index.unwrap();
        assert_eq!(*counts.cell(0, 0), 2);
        assert_eq!(index.cell(0, 0).iter().collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(index.cell(1, 1).iter().collect::<Vec<_>>(), vec![3]);
        assert!(index.cell(0, 1).is_empty());
    }

    #[test]
    fn raw_records_are_quantized_before_mapping() {
        let def = GridDef::new_buffered(2, 2).unwrap();
        let q = Quantization::new([0.001; 3], [0.0; 3]).unwrap();
        let ext = q.quantize_extent(
            &crate::geom::extent::Extent::new([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]).unwrap(),
        );
        let mut counter = GridCounter::new(def, &ext, RecordLayout::Raw, q);

        let mut data = vec![0u8; 24];
        crate::chunk::encode_raw(&mut data, [0.8, 0.2, 0.0]);
        counter.process(Chunk::new(&mut data, 24, 0, 1.0));

        let (counts, _) = counter.finish();
        // x=0.8 -> col 1, y=0.2 -> row 0
        assert_eq!(*counts.cell(0, 1), 1);
    }
}
