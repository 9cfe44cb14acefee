//! Three-pass tiling: estimate, count, tile.
//!
//! Pass 1 streams the whole source once, counting into a coarse
//! estimation grid, building the chunk-touch index, accumulating
//! elevation statistics and probing the effective coordinate precision.
//! Pass 2 re-streams and counts into the final tile grid sized from the
//! measured density. Pass 3 walks the planned segments, re-reading only
//! the chunks each segment needs, filtering and binning points into
//! tiles, and appends them to the store in row-major order.

use std::path::Path;

use log::{info, warn};

use crate::arena::BufferArena;
use crate::chunk::{encode_quantized, Chunk, RecordLayout, QUANTIZED_XYZ_SIZE};
use crate::compress::{CompressionMethod, CompressorRegistry};
use crate::density::{estimation_grid, tile_grid, TileDensity, MAX_GRID_DIMENSION};
use crate::error::{Error, Result};
use crate::geom::quant::{PrecisionProbe, Quantization};
use crate::grid::CellMapper;
use crate::process::{
    decode_lattice, ChunkProcess, ChunkProcessSet, GridCounter, ScaledStatsMapping, Statistics,
    TileRegionFilter,
};
use crate::progress::{PassContext, PassOutcome, ProgressSink};
use crate::segment::{SegmentPlanner, DEFAULT_SEGMENT_BUDGET};
use crate::source::PointSource;
use crate::store::{StoreHeader, StoreWriter};

#[derive(Debug, Clone)]
pub struct TileOptions {
    /// Target tile size; drives both grid resolutions.
    pub desired_points_per_tile: u32,
    /// Cap on the estimation grid's tile count.
    pub max_estimation_tiles: u32,
    /// Lower bound on either grid dimension.
    pub min_grid_dimension: u16,
    /// Upper bound on either grid dimension; a breach falls back to
    /// aspect-ratio sizing at the cap.
    pub max_grid_dimension: u16,
    /// Byte budget for one output segment's points.
    pub segment_budget: usize,
    /// Elevation histogram resolution.
    pub stats_bins: u32,
    pub compression: CompressionMethod,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            desired_points_per_tile: 40_000,
            max_estimation_tiles: 10_000,
            min_grid_dimension: 1,
            max_grid_dimension: MAX_GRID_DIMENSION,
            segment_budget: DEFAULT_SEGMENT_BUDGET,
            stats_bins: ScaledStatsMapping::DEFAULT_BIN_COUNT,
            compression: CompressionMethod::None,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct TileSummary {
    pub point_count: u64,
    pub tiles_x: u16,
    pub tiles_y: u16,
    pub segments: usize,
    pub density: TileDensity,
    pub stats: Statistics,
    pub quantization: Quantization,
}

/// Samples lattice coordinates for scale refinement.
struct PrecisionStage {
    probe: PrecisionProbe,
    layout: RecordLayout,
    quantization: Quantization,
}

impl ChunkProcess for PrecisionStage {
    fn name(&self) -> &'static str {
        "precision-probe"
    }

    fn process<'a>(&mut self, chunk: Chunk<'a>) -> Chunk<'a> {
        for record in chunk.records() {
            self.probe.sample(decode_lattice(record, self.layout, &self.quantization));
        }
        chunk
    }
}

pub struct Tiler<'a> {
    source: PointSource,
    arena: &'a BufferArena,
    registry: &'a CompressorRegistry,
    options: TileOptions,
}

impl<'a> Tiler<'a> {
    pub fn new(
        source: PointSource,
        arena: &'a BufferArena,
        registry: &'a CompressorRegistry,
    ) -> Self {
        Self {
            source,
            arena,
            registry,
            options: TileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TileOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs all three passes and writes the store to `output`. A
    /// cancelled run removes the partial output file.
    pub fn run(
        &self,
        output: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<PassOutcome<TileSummary>> {
        let layout = self.source.layout();
        let extent = *self.source.extent();
        let map_quant = match self.source.quantization() {
            Some(q) => *q,
            None => Quantization::derive(&extent),
        };
        let map_qext = map_quant.quantize_extent(&extent);

        // pass 1: coarse counts, chunk index, stats, precision
        let est_def = estimation_grid(
            self.source.count(),
            &extent,
            self.options.desired_points_per_tile,
            self.options.max_estimation_tiles,
            self.options.min_grid_dimension,
            self.options.max_grid_dimension,
        )?;
        let mut counter =
            GridCounter::new(est_def, &map_qext, layout, map_quant).with_chunk_index();
        let mut stats = ScaledStatsMapping::new(
            map_qext.min.z,
            map_qext.max.z,
            self.options.stats_bins,
            layout,
            map_quant,
        );
        let mut precision = PrecisionStage {
            probe: PrecisionProbe::new(self.source.count()),
            layout,
            quantization: map_quant,
        };

        {
            let mut set = ChunkProcessSet::new();
            set.push(&mut counter).push(&mut stats).push(&mut precision);
            info!("estimation pass: {}", set.describe());
            let mut ctx = PassContext::new("estimate", sink);
            let mut cursor = self.source.open_cursor(self.arena)?;
            let mut points = 0u64;
            while let Some(chunk) = cursor.next_chunk()? {
                let progress = chunk.progress();
                points += chunk.point_count() as u64;
                set.process(chunk);
                if !ctx.update(progress) {
                    break;
                }
            }
            ctx.log_points(points);
            if ctx.cancelled() {
                return Ok(PassOutcome::Cancelled);
            }
        }

        let (coarse_counts, chunk_index) = counter.finish();
        let Some(chunk_index) = chunk_index else {
            unreachable!("chunk index enabled above");
        };
        let stats = stats.finish();
        let est_density = TileDensity::new(&coarse_counts, &extent);

        let out_quant = precision.probe.refine(&map_quant)?;
        if out_quant != map_quant {
            info!(
                "precision probe coarsened scale to ({:e}, {:e}, {:e})",
                out_quant.scale()[0],
                out_quant.scale()[1],
                out_quant.scale()[2]
            );
        }
        // quantized records stay on the source lattice through the
        // remaining passes and move to the output lattice at write time
        let stage_quant = match layout {
            RecordLayout::Quantized => map_quant,
            RecordLayout::Raw => out_quant,
        };
        let stage_qext = stage_quant.quantize_extent(&extent);

        // pass 2: exact counts on the final grid
        let fine_def = tile_grid(
            &est_density,
            &extent,
            self.options.desired_points_per_tile,
            self.options.min_grid_dimension,
            self.options.max_grid_dimension,
        )?;
        let mut fine_counter = GridCounter::new(fine_def, &stage_qext, layout, stage_quant);
        {
            let mut ctx = PassContext::new("count", sink);
            let mut cursor = self.source.open_cursor(self.arena)?;
            let mut points = 0u64;
            while let Some(chunk) = cursor.next_chunk()? {
                let progress = chunk.progress();
                points += chunk.point_count() as u64;
                fine_counter.process(chunk);
                if !ctx.update(progress) {
                    break;
                }
            }
            ctx.log_points(points);
            if ctx.cancelled() {
                return Ok(PassOutcome::Cancelled);
            }
        }
        let (fine_counts, _) = fine_counter.finish();
        let density = TileDensity::new(&fine_counts, &extent);
        if density.point_count != self.source.count() {
            warn!(
                "counted {} points, source declares {}",
                density.point_count,
                self.source.count()
            );
        }

        // pass 3: plan segments, filter, assemble, write
        let plans = SegmentPlanner::new(
            &fine_counts,
            &chunk_index,
            self.source.point_size() as usize,
            self.source.points_per_chunk(self.arena),
        )
        .with_budget(
            self.options.segment_budget,
            self.source.points_per_chunk(self.arena),
        )
        .plan();

        let header = StoreHeader {
            point_count: density.point_count,
            point_size: QUANTIZED_XYZ_SIZE as u16,
            compression: self.options.compression,
            quantization: out_quant,
            extent,
            stats: Some(stats),
            density: Some(density.clone()),
            tiles_x: fine_def.size_x(),
            tiles_y: fine_def.size_y(),
        };
        let mut writer =
            StoreWriter::create(output, self.arena, &header, &fine_counts, self.registry)?;

        let mapper = CellMapper::new(&fine_def, &stage_qext);
        let sx = fine_def.size_x() as u32;
        let total_points = density.point_count.max(1);
        let mut written = 0u64;
        let mut ctx = PassContext::new("tile", sink);

        for plan in &plans {
            let tile_n = (plan.tiles.end - plan.tiles.start) as usize;
            let mut bounds = vec![0usize; tile_n + 1];
            for (k, i) in plan.tiles.clone().enumerate() {
                let (row, col) = ((i / sx) as u16, (i % sx) as u16);
                bounds[k + 1] = bounds[k] + *fine_counts.cell(row, col) as usize;
            }
            debug_assert_eq!(bounds[tile_n] as u64, plan.points);

            let mut buffer = vec![0u8; bounds[tile_n] * QUANTIZED_XYZ_SIZE];
            let mut cursors = bounds.clone();

            let mut filter = TileRegionFilter::new(
                fine_def,
                &stage_qext,
                plan.filter_range.clone(),
                layout,
                stage_quant,
            );
            let mut cursor = self.source.open_sparse_cursor(self.arena, &plan.chunks)?;
            while let Some(chunk) = cursor.next_chunk()? {
                let kept = filter.process(chunk);
                for record in kept.records() {
                    let p = decode_lattice(record, layout, &stage_quant);
                    let (row, col) = mapper.cell(p.x, p.y);
                    let row = row.min(fine_def.size_y() - 1) as u32;
                    let col = col.min(fine_def.size_x() - 1) as u32;
                    let k = (row * sx + col - plan.tiles.start) as usize;

                    let out = if layout == RecordLayout::Quantized && out_quant != stage_quant {
                        stage_quant.requantize(p, &out_quant)
                    } else {
                        p
                    };
                    let slot = cursors[k] * QUANTIZED_XYZ_SIZE;
                    encode_quantized(&mut buffer[slot..slot + QUANTIZED_XYZ_SIZE], out);
                    cursors[k] += 1;
                }
                written += kept.point_count() as u64;
                if !ctx.update(written as f32 / total_points as f32) {
                    break;
                }
            }
            if ctx.cancelled() {
                break;
            }

            for k in 0..tile_n {
                if cursors[k] != bounds[k + 1] {
                    return Err(Error::BadStore {
                        path: output.to_path_buf(),
                        reason: format!(
                            "segment tile {} collected {} of {} points; input changed between passes?",
                            plan.tiles.start + k as u32,
                            cursors[k] - bounds[k],
                            bounds[k + 1] - bounds[k]
                        ),
                    });
                }
                writer.append_tile(&buffer[bounds[k] * QUANTIZED_XYZ_SIZE..bounds[k + 1] * QUANTIZED_XYZ_SIZE])?;
            }
        }
        ctx.log_points(written);
        if ctx.cancelled() {
            drop(writer);
            let _ = std::fs::remove_file(output);
            return Ok(PassOutcome::Cancelled);
        }
        writer.finish()?;

        Ok(PassOutcome::Completed(TileSummary {
            point_count: density.point_count,
            tiles_x: fine_def.size_x(),
            tiles_y: fine_def.size_y(),
            segments: plans.len(),
            density,
            stats,
            quantization: out_quant,
        }))
    }
}
