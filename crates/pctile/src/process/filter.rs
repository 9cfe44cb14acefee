//! Tile-range filtering pass with in-place compaction.

use std::ops::Range;

use crate::chunk::{Chunk, RecordLayout};
use crate::geom::quant::{Quantization, QuantizedExtent};
use crate::grid::{CellMapper, Grid, GridDef};
use crate::process::{decode_lattice, ChunkProcess};

/// Keeps only the records whose tile falls in a half-open packed-index
/// range, compacting survivors to the front of the chunk and counting
/// them per tile. One filter serves one output segment; the count grid
/// it accumulates drives that segment's tile directory.
///
/// Unlike the counting pass, coordinates on the maximum edge are
/// clamped to the last logical tile up front rather than folded later:
/// a segment boundary can split a row, and the buffered cell's packed
/// index would put the point in the wrong segment.
pub struct TileRegionFilter {
    counts: Grid<u32>,
    mapper: CellMapper,
    range: Range<u32>,
    layout: RecordLayout,
    quantization: Quantization,
}

impl TileRegionFilter {
    pub fn new(
        def: GridDef,
        qext: &QuantizedExtent,
        range: Range<u32>,
        layout: RecordLayout,
        quantization: Quantization,
    ) -> Self {
        Self {
            mapper: CellMapper::new(&def, qext),
            counts: Grid::new(def, 0),
            range,
            layout,
            quantization,
        }
    }

    #[inline]
    pub fn range(&self) -> Range<u32> {
        self.range.clone()
    }

    /// Surrenders the per-tile counts of the records this filter kept.
    pub fn finish(self) -> Grid<u32> {
        self.counts
    }
}

impl ChunkProcess for TileRegionFilter {
    fn name(&self) -> &'static str {
        "tile-region-filter"
    }

    fn process<'a>(&mut self, mut chunk: Chunk<'a>) -> Chunk<'a> {
        let point_size = chunk.point_size();
        let total = chunk.point_count();
        let bytes = chunk.bytes_mut();

        let mut kept = 0usize;
        for i in 0..total {
            let src = i * point_size;
            let p = decode_lattice(&bytes[src..src + point_size], self.layout, &self.quantization);
            let (row, col) = self.mapper.cell(p.x, p.y);
            let row = row.min(self.counts.def().size_y() - 1);
            let col = col.min(self.counts.def().size_x() - 1);
            if !self.range.contains(&self.counts.def().index(row, col)) {
                continue;
            }
            *self.counts.cell_mut(row, col) += 1;
            let dst = kept * point_size;
            if dst != src {
                bytes.copy_within(src..src + point_size, dst);
            }
            kept += 1;
        }
        chunk.shrink(kept)
    }
}
