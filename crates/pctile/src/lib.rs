//! Out-of-core point cloud tiling.
//!
//! Takes a file of fixed-size point records too large for memory and
//! produces a spatially tiled store: coordinates quantized to a signed
//! 32-bit decimal lattice, points grouped into roughly equal-count
//! tiles, with per-tile counts, density and elevation statistics in the
//! header. The input is streamed in three sequential passes through a
//! pooled buffer arena; no pass holds more than one segment's points.

pub mod arena;
pub mod chunk;
pub mod compress;
pub mod density;
pub mod error;
pub mod geom;
pub mod grid;
pub mod process;
pub mod progress;
pub mod segment;
pub mod sort;
pub mod source;
pub mod store;
pub mod stream;
pub mod tiler;

pub use arena::BufferArena;
pub use compress::{CompressionMethod, CompressorRegistry};
pub use density::TileDensity;
pub use error::{Error, Result};
pub use geom::{Extent, Quantization};
pub use progress::{NoProgress, PassOutcome, ProgressSink};
pub use source::PointSource;
pub use store::StoreReader;
pub use tiler::{TileOptions, TileSummary, Tiler};
