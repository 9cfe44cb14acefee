//! Fixed-point quantization of continuous coordinates.
//!
//! A `Quantization` maps a real coordinate to a signed 32-bit lattice via
//! `round((real - offset) / scale)`. Derivation picks, per axis, the
//! largest power-of-ten precision that still fits the extent in the i32
//! budget: decimal scales keep the integers legible and compress well.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::geom::extent::Extent;
use crate::sort::par_bucket_sort;

/// The signed 32-bit coordinate budget used by scale derivation.
const LATTICE_RANGE: f64 = i32::MAX as f64;

/// A point on the quantized lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedPoint {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Quantized bounding box. Ranges are computed as unsigned to tolerate
/// the full i32 span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedExtent {
    pub min: QuantizedPoint,
    pub max: QuantizedPoint,
}

impl QuantizedExtent {
    #[inline]
    pub fn range_x(&self) -> u32 {
        self.max.x.wrapping_sub(self.min.x) as u32
    }

    #[inline]
    pub fn range_y(&self) -> u32 {
        self.max.y.wrapping_sub(self.min.y) as u32
    }

    #[inline]
    pub fn range_z(&self) -> u32 {
        self.max.z.wrapping_sub(self.min.z) as u32
    }
}

/// Immutable scale/offset pair per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantization {
    scale: [f64; 3],
    offset: [f64; 3],
}

impl Quantization {
    pub fn new(scale: [f64; 3], offset: [f64; 3]) -> Result<Self> {
        for s in scale {
            if !(s > 0.0) || !s.is_finite() {
                return Err(Error::InvalidQuantization(s));
            }
        }
        Ok(Self { scale, offset })
    }

    #[inline]
    pub fn scale(&self) -> [f64; 3] {
        self.scale
    }

    #[inline]
    pub fn offset(&self) -> [f64; 3] {
        self.offset
    }

    /// Derives a quantization from an extent.
    ///
    /// Offsets are floored to whole units so quantized values stay
    /// non-negative within the extent; if flooring would more than double
    /// the axis range (tiny ranges at large magnitudes, e.g. degrees),
    /// the exact minimum is used instead. The scale is the smallest
    /// power of ten such that the offset-adjusted range fits in i32.
    pub fn derive(extent: &Extent) -> Self {
        let min = extent.min();
        let max = extent.max();

        let mut scale = [0.0; 3];
        let mut offset = [0.0; 3];
        for axis in 0..3 {
            let range = max[axis] - min[axis];
            let mut o = min[axis].floor();
            if min[axis] - o > range {
                o = min[axis];
            }

            let offset_range = max[axis] - o;
            let precision = (LATTICE_RANGE / offset_range).log10().floor() as i32;
            scale[axis] = 10f64.powi(-precision);
            offset[axis] = o;
        }

        Self { scale, offset }
    }

    #[inline]
    pub fn quantize(&self, p: [f64; 3]) -> QuantizedPoint {
        QuantizedPoint {
            x: ((p[0] - self.offset[0]) / self.scale[0]).round() as i32,
            y: ((p[1] - self.offset[1]) / self.scale[1]).round() as i32,
            z: ((p[2] - self.offset[2]) / self.scale[2]).round() as i32,
        }
    }

    #[inline]
    pub fn unquantize(&self, q: QuantizedPoint) -> [f64; 3] {
        [
            q.x as f64 * self.scale[0] + self.offset[0],
            q.y as f64 * self.scale[1] + self.offset[1],
            q.z as f64 * self.scale[2] + self.offset[2],
        ]
    }

    pub fn quantize_extent(&self, extent: &Extent) -> QuantizedExtent {
        QuantizedExtent {
            min: self.quantize(extent.min()),
            max: self.quantize(extent.max()),
        }
    }

    pub fn unquantize_extent(&self, q: &QuantizedExtent) -> Result<Extent> {
        Extent::new(self.unquantize(q.min), self.unquantize(q.max))
    }

    /// Re-expresses a point quantized under `self` on the lattice of
    /// `target`.
    #[inline]
    pub fn requantize(&self, q: QuantizedPoint, target: &Quantization) -> QuantizedPoint {
        target.quantize(self.unquantize(q))
    }

    /// Serialized form: scaleX..Z then offsetX..Z, little-endian doubles.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for s in self.scale {
            w.write_f64::<LittleEndian>(s)?;
        }
        for o in self.offset {
            w.write_f64::<LittleEndian>(o)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut scale = [0.0; 3];
        let mut offset = [0.0; 3];
        for s in scale.iter_mut() {
            *s = r.read_f64::<LittleEndian>()?;
        }
        for o in offset.iter_mut() {
            *o = r.read_f64::<LittleEndian>()?;
        }
        Ok(Self { scale, offset })
    }
}

/// Samples coordinate values from the stream to detect whether the data
/// is coarser than the extent-derived scale, and loosens the scale to
/// match. Sampling is capped so the probe stays within a fixed memory
/// budget regardless of source size.
pub struct PrecisionProbe {
    capacity: usize,
    values: [Vec<i32>; 3],
}

impl PrecisionProbe {
    pub const DEFAULT_MEMORY_LIMIT: usize = 16 << 20;

    pub fn new(point_count: u64) -> Self {
        let capacity = (Self::DEFAULT_MEMORY_LIMIT / (3 * std::mem::size_of::<i32>()))
            .min(point_count as usize);
        Self {
            capacity,
            values: [
                Vec::with_capacity(capacity),
                Vec::with_capacity(capacity),
                Vec::with_capacity(capacity),
            ],
        }
    }

    /// Feed one quantized point. Ignored once the sample budget is full.
    #[inline]
    pub fn sample(&mut self, q: QuantizedPoint) {
        if self.values[0].len() < self.capacity {
            self.values[0].push(q.x);
            self.values[1].push(q.y);
            self.values[2].push(q.z);
        }
    }

    /// Produces a quantization no finer than the sampled data supports.
    ///
    /// Per axis: sort the sampled lattice values, take successive
    /// differences, and estimate the dominant power of ten dividing them
    /// from the count-weighted mean of their log10. If the data only
    /// ever moves in steps of 10^k lattice units, k digits of the input
    /// precision are noise and the scale is coarsened by 10^k. X and Y
    /// are coarsened by the same (smaller) amount so planar tiles stay
    /// square in lattice units.
    pub fn refine(mut self, input: &Quantization) -> Result<Quantization> {
        let mut adjust = [0i32; 3];
        for axis in 0..3 {
            adjust[axis] = Self::dominant_pow10(&mut self.values[axis]);
        }
        // keep X and Y scales identical
        let planar = adjust[0].min(adjust[1]);
        adjust[0] = planar;
        adjust[1] = planar;

        let mut scale = input.scale();
        for axis in 0..3 {
            if adjust[axis] > 0 {
                let digits = (1.0 / scale[axis]).log10().round() as i32;
                if adjust[axis] < digits {
                    scale[axis] = 10f64.powi(adjust[axis] - digits);
                }
            }
        }

        Quantization::new(scale, input.offset())
    }

    fn dominant_pow10(values: &mut Vec<i32>) -> i32 {
        if values.len() < 2 {
            return 0;
        }
        par_bucket_sort(values);

        let mut log_sum = 0.0;
        let mut nonzero = 0u64;
        for pair in values.windows(2) {
            let diff = pair[1].wrapping_sub(pair[0]) as u32;
            if diff > 0 {
                log_sum += (diff as f64).log10();
                nonzero += 1;
            }
        }
        if nonzero == 0 {
            return 0;
        }

        // round before truncating so e.g. 0.9994 counts as one digit
        let ratio = (log_sum / nonzero as f64 * 1000.0).round() / 1000.0;
        ratio as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent_1km() -> Extent {
        Extent::new([0.0, 0.0, 0.0], [1000.0, 1000.0, 100.0]).unwrap()
    }

    #[test]
    fn derive_maximizes_decimal_precision() {
        let q = Quantization::derive(&extent_1km());
        // 2^31 / 1000 ~ 2.1e6 -> 6 decimal digits
        assert_eq!(q.scale()[0], 1e-6);
        assert_eq!(q.scale()[1], 1e-6);
        // 2^31 / 100 ~ 2.1e7 -> 7 decimal digits
        assert_eq!(q.scale()[2], 1e-7);
    }

    #[test]
    fn extremes_fit_in_i32() {
        for (min, max) in [
            ([0.0, 0.0, 0.0], [1000.0, 1000.0, 100.0]),
            ([-5e6, -5e6, -100.0], [5e6, 5e6, 9000.0]),
            ([13.37, 47.61, 0.0], [13.38, 47.62, 0.5]),
        ] {
            let e = Extent::new(min, max).unwrap();
            let q = Quantization::derive(&e);
            // quantize of both corners must not saturate
            let lo = q.quantize(e.min());
            let hi = q.quantize(e.max());
            assert!(hi.x > lo.x && hi.y > lo.y && hi.z > lo.z);
            let back = q.unquantize(hi);
            assert!((back[0] - max[0]).abs() < q.scale()[0]);
        }
    }

    #[test]
    fn round_trip_within_one_step() {
        let e = extent_1km();
        let q = Quantization::derive(&e);
        for p in [
            [0.0, 0.0, 0.0],
            [123.456789, 987.654321, 55.5],
            [1000.0, 1000.0, 100.0],
        ] {
            let back = q.unquantize(q.quantize(p));
            for axis in 0..3 {
                assert!(
                    (back[axis] - p[axis]).abs() < q.scale()[axis],
                    "axis {axis}: {} vs {}",
                    back[axis],
                    p[axis]
                );
            }
        }
    }

    #[test]
    fn degree_extent_keeps_exact_offset() {
        // flooring the offset would add ~0.37 to a 0.01 range
        let e = Extent::new([13.37, 47.61, 0.0], [13.38, 47.62, 10.0]).unwrap();
        let q = Quantization::derive(&e);
        assert_eq!(q.offset()[0], 13.37);
        assert_eq!(q.offset()[1], 47.61);
        assert_eq!(q.offset()[2], 0.0);
    }

    #[test]
    fn rejects_non_positive_scale() {
        assert!(Quantization::new([0.0, 1.0, 1.0], [0.0; 3]).is_err());
        assert!(Quantization::new([1.0, -0.5, 1.0], [0.0; 3]).is_err());
    }

    #[test]
    fn persisted_field_order() {
        let q = Quantization::new([0.01, 0.01, 0.001], [100.0, 200.0, 300.0]).unwrap();
        let mut buf = Vec::new();
        q.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 48);
        assert_eq!(f64::from_le_bytes(buf[0..8].try_into().unwrap()), 0.01);
        assert_eq!(f64::from_le_bytes(buf[24..32].try_into().unwrap()), 100.0);
        let back = Quantization::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back, q);
    }

    #[test]
    fn probe_coarsens_scale_to_data_precision() {
        let e = extent_1km();
        let q = Quantization::derive(&e);
        // data only moves in steps of 100 lattice units (two junk digits)
        let mut probe = PrecisionProbe::new(10_000);
        for i in 0..10_000i32 {
            probe.sample(QuantizedPoint {
                x: i * 100,
                y: i * 100,
                z: i * 100,
            });
        }
        let refined = probe.refine(&q).unwrap();
        assert_eq!(refined.scale()[0], 1e-4);
        assert_eq!(refined.scale()[2], 1e-5);
    }

    #[test]
    fn probe_keeps_full_precision_data() {
        let e = extent_1km();
        let q = Quantization::derive(&e);
        let mut probe = PrecisionProbe::new(1000);
        for i in 0..1000i32 {
            probe.sample(QuantizedPoint {
                x: i * 7 + (i % 3),
                y: i * 13 + (i % 2),
                z: i * 3,
            });
        }
        let refined = probe.refine(&q).unwrap();
        assert_eq!(refined.scale()[0], q.scale()[0]);
    }
}
