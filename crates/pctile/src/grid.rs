//! Tile grid definition and dense 2D grid storage.
//!
//! Dimensions are rounded up to power-of-two bit widths so a cell's
//! packed index is a shift-or rather than a multiply-add; downstream
//! consumers compute this per point, potentially billions of times, and
//! the packed space doubles as the sort key for building contiguous
//! segment ranges.

use crate::error::{Error, Result};
use crate::geom::quant::QuantizedExtent;

/// Logical tile counts plus the bit widths of the (possibly buffered)
/// underlying storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDef {
    size_x: u16,
    size_y: u16,
    underlying_x: u16,
    underlying_y: u16,
    bits_x: u32,
    bits_y: u32,
}

fn bits_for(v: u16) -> u32 {
    if v <= 1 {
        0
    } else {
        32 - (v as u32 - 1).leading_zeros()
    }
}

impl GridDef {
    pub fn new(size_x: u16, size_y: u16) -> Result<Self> {
        Self::create(size_x, size_y, false)
    }

    /// Adds one extra row and column to the underlying storage to absorb
    /// coordinates that land exactly on the extent's maximum edge.
    pub fn new_buffered(size_x: u16, size_y: u16) -> Result<Self> {
        Self::create(size_x, size_y, true)
    }

    fn create(size_x: u16, size_y: u16, buffered: bool) -> Result<Self> {
        // a buffered grid needs room for the extra row and column
        let limit = if buffered { u16::MAX - 1 } else { u16::MAX };
        if size_x == 0 || size_y == 0 || size_x > limit || size_y > limit {
            return Err(Error::InvalidGridSize(size_x, size_y));
        }
        let (underlying_x, underlying_y) = if buffered {
            (size_x + 1, size_y + 1)
        } else {
            (size_x, size_y)
        };
        Ok(Self {
            size_x,
            size_y,
            underlying_x,
            underlying_y,
            bits_x: bits_for(underlying_x),
            bits_y: bits_for(underlying_y),
        })
    }

    /// Sizes a grid from an extent aspect ratio: the longer axis gets
    /// `max_dimension` tiles and the shorter shrinks proportionally,
    /// floored at `min_dimension`, keeping tiles roughly square in
    /// world units.
    pub fn from_aspect(
        aspect: f64,
        min_dimension: u16,
        max_dimension: u16,
        buffered: bool,
    ) -> Result<Self> {
        let mut size_x = max_dimension;
        let mut size_y = max_dimension;
        if aspect > 1.0 {
            size_y = ((size_x as f64 / aspect) as u16).max(min_dimension);
        } else {
            size_x = ((size_x as f64 * aspect) as u16).max(min_dimension);
        }
        Self::create(size_x, size_y, buffered)
    }

    #[inline]
    pub fn size_x(&self) -> u16 {
        self.size_x
    }

    #[inline]
    pub fn size_y(&self) -> u16 {
        self.size_y
    }

    #[inline]
    pub fn underlying_x(&self) -> u16 {
        self.underlying_x
    }

    #[inline]
    pub fn underlying_y(&self) -> u16 {
        self.underlying_y
    }

    #[inline]
    pub fn buffered(&self) -> bool {
        self.underlying_x != self.size_x
    }

    /// Logical cell count (excluding any buffered edge).
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.size_x as usize * self.size_y as usize
    }

    /// Size of the packed index space.
    #[inline]
    pub fn index_space(&self) -> u64 {
        1u64 << (self.bits_x + self.bits_y)
    }

    /// Packed cell index. Rows cannot alias because the column field is
    /// sized to the underlying width.
    #[inline]
    pub fn index(&self, row: u16, col: u16) -> u32 {
        ((row as u32) << self.bits_x) | col as u32
    }

    /// Converts a row-major scan position over the logical cells into
    /// the packed index of that cell.
    #[inline]
    pub fn index_of_incremental(&self, incremental: u32) -> u32 {
        let row = incremental / self.size_x as u32;
        let col = incremental % self.size_x as u32;
        (row << self.bits_x) | col
    }

    /// Row-major ordering over the logical cells.
    pub fn tile_ordering(&self) -> impl Iterator<Item = (u16, u16)> {
        let (sx, sy) = (self.size_x, self.size_y);
        (0..sy).flat_map(move |row| (0..sx).map(move |col| (row, col)))
    }
}

/// Dense storage over a `GridDef`.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    def: GridDef,
    fill: T,
    data: Vec<T>,
}

impl<T: Clone> Grid<T> {
    pub fn new(def: GridDef, fill: T) -> Self {
        let len = def.underlying_x as usize * def.underlying_y as usize;
        Self {
            def,
            data: vec![fill.clone(); len],
            fill,
        }
    }

    #[inline]
    pub fn def(&self) -> &GridDef {
        &self.def
    }

    #[inline]
    fn slot(&self, row: u16, col: u16) -> usize {
        debug_assert!(row < self.def.underlying_y && col < self.def.underlying_x);
        row as usize * self.def.underlying_x as usize + col as usize
    }

    #[inline]
    pub fn cell(&self, row: u16, col: u16) -> &T {
        &self.data[self.slot(row, col)]
    }

    #[inline]
    pub fn cell_mut(&mut self, row: u16, col: u16) -> &mut T {
        let i = self.slot(row, col);
        &mut self.data[i]
    }

    pub fn reset(&mut self) {
        let fill = self.fill.clone();
        self.data.fill(fill);
    }

    /// Iterates the logical cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &T> {
        let ux = self.def.underlying_x as usize;
        let sx = self.def.size_x as usize;
        self.data
            .chunks(ux)
            .take(self.def.size_y as usize)
            .flat_map(move |row| &row[..sx])
    }

    /// Folds the buffered edge back into the last valid row and column.
    ///
    /// A coordinate exactly on the extent's maximum edge scales to index
    /// `size`, one past the last logical cell; the buffered edge exists
    /// to receive it. Must run exactly once after a streaming pass and
    /// before the grid is read.
    pub fn correct_overflow_with(&mut self, mut merge: impl FnMut(&mut T, T)) {
        if !self.def.buffered() {
            return;
        }
        let fill = self.fill.clone();
        let last_row = self.def.size_y - 1;
        let buf_row = self.def.size_y;
        for col in 0..self.def.underlying_x {
            let v = std::mem::replace(self.cell_mut(buf_row, col), fill.clone());
            merge(self.cell_mut(last_row, col), v);
        }
        let last_col = self.def.size_x - 1;
        let buf_col = self.def.size_x;
        for row in 0..self.def.size_y {
            let v = std::mem::replace(self.cell_mut(row, buf_col), fill.clone());
            merge(self.cell_mut(row, last_col), v);
        }
    }

    /// Maps one cell of `scaled` (a grid of different resolution over
    /// the same extent) onto the corresponding cells of `self`, yielding
    /// the coordinates and values of the non-fill ones.
    pub fn cells_in_scaled_range<'a>(
        &'a self,
        scaled_x: u16,
        scaled_y: u16,
        scaled: &GridDef,
    ) -> impl Iterator<Item = (u16, u16, &'a T)>
    where
        T: PartialEq,
    {
        let sx = self.def.size_x as f64;
        let sy = self.def.size_y as f64;
        let start_x = (scaled_x as f64 / scaled.size_x as f64 * sx).floor() as u16;
        let start_y = (scaled_y as f64 / scaled.size_y as f64 * sy).floor() as u16;
        let end_x = (((scaled_x + 1) as f64 / scaled.size_x as f64 * sx).ceil() as u16)
            .min(self.def.size_x);
        let end_y = (((scaled_y + 1) as f64 / scaled.size_y as f64 * sy).ceil() as u16)
            .min(self.def.size_y);

        (start_y..end_y).flat_map(move |row| {
            (start_x..end_x).filter_map(move |col| {
                let v = self.cell(row, col);
                (*v != self.fill).then_some((row, col, v))
            })
        })
    }
}

impl Grid<u32> {
    pub fn correct_overflow(&mut self) {
        self.correct_overflow_with(|a, b| *a += b);
    }

    pub fn total(&self) -> u64 {
        self.data.iter().map(|&c| c as u64).sum()
    }
}

/// The single overflow-aware mapping from a quantized planar coordinate
/// to a tile cell. Counting and filtering both go through this so their
/// row/col derivations cannot diverge.
#[derive(Debug, Clone, Copy)]
pub struct CellMapper {
    min_x: f64,
    min_y: f64,
    tiles_over_range_x: f64,
    tiles_over_range_y: f64,
    edge_row: u16,
    edge_col: u16,
}

impl CellMapper {
    pub fn new(def: &GridDef, qext: &QuantizedExtent) -> Self {
        Self {
            min_x: qext.min.x as f64,
            min_y: qext.min.y as f64,
            tiles_over_range_x: def.size_x() as f64 / qext.range_x() as f64,
            tiles_over_range_y: def.size_y() as f64 / qext.range_y() as f64,
            // the maximum edge maps into the buffered row/col when present
            edge_row: def.underlying_y() - 1,
            edge_col: def.underlying_x() - 1,
        }
    }

    /// Returns (row, col); a coordinate on the maximum edge lands in the
    /// buffered row/col and is folded back by `correct_overflow`.
    #[inline]
    pub fn cell(&self, x: i32, y: i32) -> (u16, u16) {
        let row = ((y as f64 - self.min_y) * self.tiles_over_range_y) as u16;
        let col = ((x as f64 - self.min_x) * self.tiles_over_range_x) as u16;
        (row.min(self.edge_row), col.min(self.edge_col))
    }
}
