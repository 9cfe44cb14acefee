//! Composable per-chunk pipeline stages.
//!
//! A stage receives a chunk view, reads or rewrites it, and hands back
//! the same view or a shorter one; the next stage sees only what the
//! previous one kept. Stages own their accumulators and surrender them
//! after the pass, so a pass is: build stages, stream chunks through a
//! `ChunkProcessSet`, then take the results apart.

pub mod counter;
pub mod filter;
pub mod stats;

pub use counter::{GridCounter, TouchedChunks};
pub use filter::TileRegionFilter;
pub use stats::{ScaledStatsMapping, Statistics};

use log::debug;

use crate::chunk::{decode_quantized, decode_raw, Chunk, RecordLayout};
use crate::geom::quant::{Quantization, QuantizedPoint};

/// Decodes the record's coordinates onto the lattice of `q`, quantizing
/// first when the record carries raw doubles.
#[inline]
pub(crate) fn decode_lattice(record: &[u8], layout: RecordLayout, q: &Quantization) -> QuantizedPoint {
    match layout {
        RecordLayout::Quantized => decode_quantized(record),
        RecordLayout::Raw => q.quantize(decode_raw(record)),
    }
}

pub trait ChunkProcess {
    fn name(&self) -> &'static str;

    /// Consumes the chunk and returns the view the next stage should
    /// see. A filtering stage returns a front-clamped shorter view.
    fn process<'a>(&mut self, chunk: Chunk<'a>) -> Chunk<'a>;
}

/// An ordered set of stages applied to every chunk of a pass.
pub struct ChunkProcessSet<'p> {
    stages: Vec<&'p mut dyn ChunkProcess>,
}

impl<'p> ChunkProcessSet<'p> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn push(&mut self, stage: &'p mut dyn ChunkProcess) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Stage names in application order, for pass logging.
    pub fn describe(&self) -> String {
        let names: Vec<_> = self.stages.iter().map(|s| s.name()).collect();
        names.join(", ")
    }

    /// Runs the chunk through every stage. Stops early once a stage
    /// discards everything.
    pub fn process<'a>(&mut self, mut chunk: Chunk<'a>) -> Chunk<'a> {
        for stage in &mut self.stages {
            if chunk.point_count() == 0 {
                debug!("chunk {} emptied before {}", chunk.index(), stage.name());
                break;
            }
            chunk = stage.process(chunk);
        }
        chunk
    }
}

impl<'p> Default for ChunkProcessSet<'p> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct KeepHalf;

    impl ChunkProcess for KeepHalf {
        fn name(&self) -> &'static str {
            "keep-half"
        }
        fn process<'a>(&mut self, chunk: Chunk<'a>) -> Chunk<'a> {
            let n = chunk.point_count() / 2;
            chunk.shrink(n)
        }
    }

    struct CountPoints(usize);

    impl ChunkProcess for CountPoints {
        fn name(&self) -> &'static str {
            "count"
        }
        fn process<'a>(&mut self, chunk: Chunk<'a>) -> Chunk<'a> {
            self.0 += chunk.point_count();
            chunk
        }
    }

    #[test]
    fn stages_see_the_previous_stage_output() {
        let mut half = KeepHalf;
        let mut count = CountPoints(0);
        let mut set = ChunkProcessSet::new();
        set.push(&mut half).push(&mut count);
        assert_eq!(set.describe(), "keep-half, count");

        let mut data = [0u8; 120];
        let out = set.process(Chunk::new(&mut data, 12, 0, 0.0));
        assert_eq!(out.point_count(), 5);
        drop(set);
        assert_eq!(count.0, 5);
    }

    #[test]
    fn empty_chunk_skips_later_stages() {
        let mut half = KeepHalf;
        let mut count = CountPoints(0);
        let mut set = ChunkProcessSet::new();
        set.push(&mut half).push(&mut count);

        let mut data = [0u8; 12]; // one point; keep-half discards it
        let out = set.process(Chunk::new(&mut data, 12, 0, 0.0));
        assert_eq!(out.point_count(), 0);
        drop(set);
        assert_eq!(count.0, 0);
    }
}
