//! Output segment planning from the chunk-touch index.
//!
//! The tiling pass cannot hold the whole dataset, so the output is
//! produced in segments: contiguous row-major runs of tiles whose
//! points fit a memory budget. For each segment the coarse chunk-touch
//! index tells us which input chunks contain at least one of its
//! points, and only those chunks are re-read. On spatially coherent
//! input that is a small fraction of the file; on shuffled input it
//! degrades to a full scan, never worse.

use std::collections::BTreeSet;
use std::ops::Range;

use log::info;

use crate::grid::{Grid, GridDef};
use crate::process::TouchedChunks;
use crate::source::ChunkRange;

/// Per-segment point budget: 256 MiB of record bytes.
pub const DEFAULT_SEGMENT_BUDGET: usize = 256 << 20;

/// One planned output segment.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    /// Row-major scan positions of the segment's tiles, over the
    /// logical cells of the fine grid.
    pub tiles: Range<u32>,
    /// Packed-index range for the region filter.
    pub filter_range: Range<u32>,
    /// Exact point count from the fine count grid.
    pub points: u64,
    /// Input chunks to re-read, sorted and collapsed.
    pub chunks: Vec<ChunkRange>,
}

/// Splits the fine tile grid into budgeted segments.
pub struct SegmentPlanner<'a> {
    fine_counts: &'a Grid<u32>,
    chunk_index: &'a Grid<TouchedChunks>,
    point_size: usize,
    segment_budget: usize,
    max_chunks_per_segment: usize,
}

impl<'a> SegmentPlanner<'a> {
    /// `fine_counts` is the corrected fine count grid; `chunk_index`
    /// the coarse chunk-touch grid from the counting pass.
    /// `points_per_chunk` bounds how much one re-read chunk can hold,
    /// which caps the chunk list so a segment's re-read cannot exceed
    /// the budget either.
    pub fn new(
        fine_counts: &'a Grid<u32>,
        chunk_index: &'a Grid<TouchedChunks>,
        point_size: usize,
        points_per_chunk: usize,
    ) -> Self {
        let mut planner = Self {
            fine_counts,
            chunk_index,
            point_size,
            segment_budget: DEFAULT_SEGMENT_BUDGET,
            max_chunks_per_segment: 0,
        };
        planner.set_budget(DEFAULT_SEGMENT_BUDGET, points_per_chunk);
        planner
    }

    pub fn with_budget(mut self, bytes: usize, points_per_chunk: usize) -> Self {
        self.set_budget(bytes, points_per_chunk);
        self
    }

    fn set_budget(&mut self, bytes: usize, points_per_chunk: usize) {
        self.segment_budget = bytes;
        self.max_chunks_per_segment = (bytes / (points_per_chunk * self.point_size)).max(1);
    }

    /// Walks the fine tiles in row-major order, closing a segment when
    /// adding the next tile would exceed the point budget or the chunk
    /// cap. A single oversized tile still gets a segment of its own.
    pub fn plan(&self) -> Vec<SegmentPlan> {
        let fine = self.fine_counts.def();

        let mut segments = Vec::new();
        let mut first_tile = 0u32;
        let mut points = 0u64;
        let mut chunks: BTreeSet<u32> = BTreeSet::new();

        for (i, (row, col)) in fine.tile_ordering().enumerate() {
            let i = i as u32;
            let tile_points = *self.fine_counts.cell(row, col) as u64;
            let tile_chunks = self.tile_chunks(row, col, fine);

            let merged_chunks = chunks.union(&tile_chunks).count();
            let over_budget = (points + tile_points) as u128 * self.point_size as u128
                > self.segment_budget as u128
                || merged_chunks > self.max_chunks_per_segment;
            if i > first_tile && over_budget {
                segments.push(self.close(first_tile..i, points, &chunks, fine));
                first_tile = i;
                points = 0;
                chunks.clear();
            }

            points += tile_points;
            chunks.extend(tile_chunks);
        }

        let total = fine.cell_count() as u32;
        segments.push(self.close(first_tile..total, points, &chunks, fine));

        info!(
            "planned {} segment(s) over {} tiles ({} points)",
            segments.len(),
            total,
            self.fine_counts.total()
        );
        segments
    }

    /// Coarse chunk sets whose footprint overlaps the fine tile.
    fn tile_chunks(&self, row: u16, col: u16, fine: &GridDef) -> BTreeSet<u32> {
        let mut set = BTreeSet::new();
        for (_, _, touched) in self.chunk_index.cells_in_scaled_range(col, row, fine) {
            set.extend(touched.iter());
        }
        set
    }

    fn close(
        &self,
        tiles: Range<u32>,
        points: u64,
        chunks: &BTreeSet<u32>,
        fine: &GridDef,
    ) -> SegmentPlan {
        let filter_range =
            fine.index_of_incremental(tiles.start)..fine.index_of_incremental(tiles.end);
        SegmentPlan {
            tiles,
            filter_range,
            points,
            chunks: collapse_chunks(chunks),
        }
    }
}

/// Collapses a sorted chunk set into maximal contiguous ranges.
fn collapse_chunks(chunks: &BTreeSet<u32>) -> Vec<ChunkRange> {
    let mut ranges: Vec<ChunkRange> = Vec::new();
    for &c in chunks {
        match ranges.last_mut() {
            Some(r) if r.start + r.count == c => r.count += 1,
            _ => ranges.push(ChunkRange { start: c, count: 1 }),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_index_all(def: GridDef, chunk: u32) -> Grid<TouchedChunks> {
        let mut grid = Grid::new(def, TouchedChunks::default());
        for (row, col) in def.tile_ordering() {
            grid.cell_mut(row, col).add(chunk);
        }
        grid
    }

    #[test]
    fn collapses_sorted_chunks_into_ranges() {
        let set: BTreeSet<u32> = [0, 1, 2, 5, 7, 8].into_iter().collect();
        let ranges = collapse_chunks(&set);
        assert_eq!(
            ranges,
            vec![
                ChunkRange { start: 0, count: 3 },
                ChunkRange { start: 5, count: 1 },
                ChunkRange { start: 7, count: 2 },
            ]
        );
    }

    #[test]
    fn single_segment_when_under_budget() {
        let fine = GridDef::new_buffered(4, 4).unwrap();
        let mut counts = Grid::new(fine, 0u32);
        for (row, col) in fine.tile_ordering() {
            *counts.cell_mut(row, col) = 10;
        }
        let coarse = GridDef::new_buffered(2, 2).unwrap();
        let index = chunk_index_all(coarse, 0);

        let plans = SegmentPlanner::new(&counts, &index, 12, 1000).plan();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].tiles, 0..16);
        assert_eq!(plans[0].points, 160);
        assert_eq!(plans[0].chunks, vec![ChunkRange { start: 0, count: 1 }]);
        assert_eq!(plans[0].filter_range.start, 0);
        assert_eq!(plans[0].filter_range.end, fine.index_of_incremental(16));
    }

    #[test]
    fn budget_splits_segments_and_covers_every_tile() {
        let fine = GridDef::new_buffered(4, 4).unwrap();
        let mut counts = Grid::new(fine, 0u32);
        for (row, col) in fine.tile_ordering() {
            *counts.cell_mut(row, col) = 100;
        }
        let coarse = GridDef::new_buffered(2, 2).unwrap();
        let index = chunk_index_all(coarse, 3);

        // 12-byte points, budget fits 400 points -> 4 tiles per segment
        let plans = SegmentPlanner::new(&counts, &index, 12, 100)
            .with_budget(400 * 12, 100)
            .plan();
        assert_eq!(plans.len(), 4);
        let mut next = 0u32;
        for p in &plans {
            assert_eq!(p.tiles.start, next);
            next = p.tiles.end;
            assert_eq!(p.points, 400);
        }
        assert_eq!(next, 16);
    }

    #[test]
    fn oversized_tile_gets_its_own_segment() {
        let fine = GridDef::new_buffered(2, 1).unwrap();
        let mut counts = Grid::new(fine, 0u32);
        *counts.cell_mut(0, 0) = 1_000_000;
        *counts.cell_mut(0, 1) = 1;
        let coarse = GridDef::new_buffered(1, 1).unwrap();
        let index = chunk_index_all(coarse, 0);

        let plans = SegmentPlanner::new(&counts, &index, 12, 10)
            .with_budget(120, 10)
            .plan();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].tiles, 0..1);
        assert_eq!(plans[0].points, 1_000_000);
        assert_eq!(plans[1].tiles, 1..2);
    }

    #[test]
    fn chunk_cap_limits_segment_growth() {
        let fine = GridDef::new_buffered(4, 1).unwrap();
        let mut counts = Grid::new(fine, 0u32);
        let coarse = GridDef::new_buffered(4, 1).unwrap();
        let mut index = Grid::new(coarse, TouchedChunks::default());
        // each coarse column touched by a distinct chunk
        for col in 0..4 {
            *counts.cell_mut(0, col) = 1;
            index.cell_mut(0, col).add(col as u32);
        }

        // budget allows 2 chunks of 1 point each per segment
        let plans = SegmentPlanner::new(&counts, &index, 12, 1)
            .with_budget(24, 1)
            .plan();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].chunks.len(), 1);
        assert_eq!(plans[0].chunks[0], ChunkRange { start: 0, count: 2 });
    }
}
