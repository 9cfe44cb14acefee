//! Coordinate geometry: real extents and fixed-point quantization.

pub mod extent;
pub mod quant;

pub use extent::Extent;
pub use quant::{PrecisionProbe, Quantization, QuantizedExtent, QuantizedPoint};
