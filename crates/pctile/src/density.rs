//! Tile density summary and grid-resolution planning.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::Result;
use crate::geom::extent::Extent;
use crate::grid::{Grid, GridDef};

/// Upper bound on a planned grid dimension; keeps the packed index
/// space and the per-tile bookkeeping sane for pathological inputs.
pub const MAX_GRID_DIMENSION: u16 = 4096;

/// Summary of a completed count grid: tile counts and per-area
/// densities. Computed once, read-only thereafter; drives the final
/// grid resolution and the dataset property display.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDensity {
    pub point_count: u64,
    pub tile_count: u32,
    pub valid_tile_count: u32,

    pub min_tile_count: u32,
    pub max_tile_count: u32,
    pub median_tile_count: u32,
    pub mean_tile_count: u32,

    pub min_tile_density: f64,
    pub max_tile_density: f64,
    pub median_tile_density: f64,
    pub mean_tile_density: f64,
}

impl TileDensity {
    /// Summarizes a corrected count grid. Only non-empty tiles
    /// participate in the order statistics.
    pub fn new(counts: &Grid<u32>, extent: &Extent) -> Self {
        let tile_count = counts.def().cell_count() as u32;

        let mut nonzero: Vec<u32> = counts.cells().copied().filter(|&c| c > 0).collect();
        nonzero.sort_unstable();

        let point_count: u64 = nonzero.iter().map(|&c| c as u64).sum();
        let valid_tile_count = nonzero.len() as u32;
        let tile_area = extent.area() / tile_count as f64;

        if nonzero.is_empty() {
            return Self {
                point_count: 0,
                tile_count,
                valid_tile_count: 0,
                min_tile_count: 0,
                max_tile_count: 0,
                median_tile_count: 0,
                mean_tile_count: 0,
                min_tile_density: 0.0,
                max_tile_density: 0.0,
                median_tile_density: 0.0,
                mean_tile_density: 0.0,
            };
        }

        let min_tile_count = nonzero[0];
        let max_tile_count = nonzero[nonzero.len() - 1];
        let median_tile_count = nonzero[nonzero.len() / 2];
        let mean_tile_count = (point_count / valid_tile_count as u64) as u32;

        Self {
            point_count,
            tile_count,
            valid_tile_count,
            min_tile_count,
            max_tile_count,
            median_tile_count,
            mean_tile_count,
            min_tile_density: min_tile_count as f64 / tile_area,
            max_tile_density: max_tile_count as f64 / tile_area,
            median_tile_density: median_tile_count as f64 / tile_area,
            mean_tile_density: mean_tile_count as f64 / tile_area,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u64::<LittleEndian>(self.point_count)?;
        w.write_u32::<LittleEndian>(self.tile_count)?;
        w.write_u32::<LittleEndian>(self.valid_tile_count)?;
        for c in [
            self.min_tile_count,
            self.max_tile_count,
            self.median_tile_count,
            self.mean_tile_count,
        ] {
            w.write_u32::<LittleEndian>(c)?;
        }
        for d in [
            self.min_tile_density,
            self.max_tile_density,
            self.median_tile_density,
            self.mean_tile_density,
        ] {
            w.write_f64::<LittleEndian>(d)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            point_count: r.read_u64::<LittleEndian>()?,
            tile_count: r.read_u32::<LittleEndian>()?,
            valid_tile_count: r.read_u32::<LittleEndian>()?,
            min_tile_count: r.read_u32::<LittleEndian>()?,
            max_tile_count: r.read_u32::<LittleEndian>()?,
            median_tile_count: r.read_u32::<LittleEndian>()?,
            mean_tile_count: r.read_u32::<LittleEndian>()?,
            min_tile_density: r.read_f64::<LittleEndian>()?,
            max_tile_density: r.read_f64::<LittleEndian>()?,
            median_tile_density: r.read_f64::<LittleEndian>()?,
            mean_tile_density: r.read_f64::<LittleEndian>()?,
        })
    }
}

/// Sizes the coarse estimation grid from the total point count: one
/// tile per `desired_points_per_tile` points for uniform data, capped
/// at `max_tiles`, with square tiles in world units.
pub fn estimation_grid(
    point_count: u64,
    extent: &Extent,
    desired_points_per_tile: u32,
    max_tiles: u32,
    min_dimension: u16,
    max_dimension: u16,
) -> Result<GridDef> {
    let uniform_tiles = (point_count / desired_points_per_tile as u64).max(1);
    let tile_count = uniform_tiles.min(max_tiles as u64) as f64;

    let tile_side = (extent.area() / tile_count).sqrt();
    sized(extent, tile_side, min_dimension, max_dimension)
}

/// Sizes the final tile grid from measured density. Median density
/// usually works better than max; max would be safer for substantially
/// varying density, but it over-fragments the common case.
pub fn tile_grid(
    density: &TileDensity,
    extent: &Extent,
    desired_points_per_tile: u32,
    min_dimension: u16,
    max_dimension: u16,
) -> Result<GridDef> {
    let tile_area = if density.median_tile_density > 0.0 {
        desired_points_per_tile as f64 / density.median_tile_density
    } else {
        extent.area()
    };
    sized(extent, tile_area.sqrt(), min_dimension, max_dimension)
}

/// Converts a target tile side into buffered grid dimensions. When the
/// target would breach `max_dimension`, sizing defers to the aspect
/// planner at the cap so tiles stay roughly square.
fn sized(
    extent: &Extent,
    tile_side: f64,
    min_dimension: u16,
    max_dimension: u16,
) -> Result<GridDef> {
    let tiles_x = (extent.range_x() / tile_side).ceil();
    let tiles_y = (extent.range_y() / tile_side).ceil();
    if tiles_x > max_dimension as f64 || tiles_y > max_dimension as f64 {
        return GridDef::from_aspect(extent.aspect(), min_dimension, max_dimension, true);
    }
    GridDef::new_buffered(
        (tiles_x as u16).max(min_dimension).max(1),
        (tiles_y as u16).max(min_dimension).max(1),
    )
}
