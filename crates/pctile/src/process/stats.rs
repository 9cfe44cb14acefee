//! Streaming elevation statistics over power-of-two lattice bins.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::chunk::{Chunk, RecordLayout};
use crate::geom::quant::Quantization;
use crate::process::{decode_lattice, ChunkProcess};

/// Summary statistics in real-world units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub variance: f64,
    pub mode: f64,
}

impl Statistics {
    #[inline]
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_f64::<LittleEndian>(self.mean)?;
        w.write_f64::<LittleEndian>(self.variance)?;
        w.write_f64::<LittleEndian>(self.mode)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            mean: r.read_f64::<LittleEndian>()?,
            variance: r.read_f64::<LittleEndian>()?,
            mode: r.read_f64::<LittleEndian>()?,
        })
    }
}

/// Histogram over quantized elevations whose bins are aligned by a
/// right shift, so binning a value costs a subtract and a shift. The
/// bin count is rounded up to a power of two; one extra bin receives
/// the extent's maximum edge and is folded back before summarizing.
pub struct ScaledStatsMapping {
    min: i32,
    shift: u32,
    bins: Vec<u64>,
    layout: RecordLayout,
    quantization: Quantization,
}

impl ScaledStatsMapping {
    pub const DEFAULT_BIN_COUNT: u32 = 1024;

    pub fn new(
        min: i32,
        max: i32,
        desired_bins: u32,
        layout: RecordLayout,
        quantization: Quantization,
    ) -> Self {
        let range = max.wrapping_sub(min) as u32;
        let range_bits = 32 - range.leading_zeros();
        let bin_bits = desired_bins.max(2).next_power_of_two().trailing_zeros();
        let shift = range_bits.saturating_sub(bin_bits);
        let bin_count = ((range >> shift) as usize) + 1;

        Self {
            min,
            shift,
            // plus the overflow bin for values on the maximum edge
            bins: vec![0; bin_count + 1],
            layout,
            quantization,
        }
    }

    #[inline]
    fn add(&mut self, value: i32) {
        let idx = (value.wrapping_sub(self.min) as u32 >> self.shift) as usize;
        let last = self.bins.len() - 1;
        self.bins[idx.min(last)] += 1;
    }

    #[inline]
    fn bin_center(&self, bin: usize) -> f64 {
        let width = 1u64 << self.shift;
        self.min as f64 + (bin as u64 * width) as f64 + width as f64 / 2.0
    }

    /// Folds the overflow bin and computes the summary. Bin members are
    /// represented by their bin's center elevation.
    pub fn finish(mut self) -> Statistics {
        let last = self.bins.len() - 1;
        let overflow = std::mem::take(&mut self.bins[last]);
        self.bins[last - 1] += overflow;

        let scale = self.quantization.scale()[2];
        let offset = self.quantization.offset()[2];

        let mut total = 0u64;
        let mut sum = 0.0f64;
        let mut mode_bin = 0usize;
        let mut mode_count = 0u64;
        for (i, &count) in self.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            total += count;
            sum += self.bin_center(i) * count as f64;
            if count > mode_count {
                mode_count = count;
                mode_bin = i;
            }
        }
        if total == 0 {
            return Statistics {
                mean: offset,
                variance: 0.0,
                mode: offset,
            };
        }

        let mean_lattice = sum / total as f64;
        let mut var_sum = 0.0f64;
        for (i, &count) in self.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let d = self.bin_center(i) - mean_lattice;
            var_sum += d * d * count as f64;
        }

        Statistics {
            mean: mean_lattice * scale + offset,
            variance: var_sum / total as f64 * scale * scale,
            mode: self.bin_center(mode_bin) * scale + offset,
        }
    }
}

impl ChunkProcess for ScaledStatsMapping {
    fn name(&self) -> &'static str {
        "elevation-stats"
    }

    fn process<'a>(&mut self, chunk: Chunk<'a>) -> Chunk<'a> {
        for record in chunk.records() {
            let p = decode_lattice(record, self.layout, &self.quantization);
            self.add(p.z);
        }
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::encode_quantized;
    use crate::geom::quant::QuantizedPoint;

    fn identity_quant() -> Quantization {
        Quantization::new([1.0; 3], [0.0; 3]).unwrap()
    }

    #[test]
    fn bin_width_tracks_desired_count() {
        // range 1<<20 spans 21 bits; 1024 bins take 10, leaving shift 11
        let m = ScaledStatsMapping::new(0, 1 << 20, 1024, RecordLayout::Quantized, identity_quant());
        assert_eq!(m.shift, 11);
        assert_eq!(m.bins.len(), 512 + 2);
    }

    #[test]
    fn narrow_range_degenerates_to_unit_bins() {
        let m = ScaledStatsMapping::new(0, 100, 1024, RecordLayout::Quantized, identity_quant());
        assert_eq!(m.shift, 0);
        assert_eq!(m.bins.len(), 102);
    }

    #[test]
    fn mean_and_mode_land_near_the_data() {
        let mut m =
            ScaledStatsMapping::new(0, 1 << 16, 256, RecordLayout::Quantized, identity_quant());
        // cluster around 10_000 with a spike at 40_000
        for i in 0..1000i32 {
            m.add(10_000 + (i % 100));
        }
        for _ in 0..200 {
            m.add(40_000);
        }
        let s = m.finish();
        let bin_width = (1u64 << 9) as f64;
        assert!((s.mean - (10_050.0 * 1000.0 + 40_000.0 * 200.0) / 1200.0).abs() < bin_width);
        assert!((s.mode - 10_050.0).abs() < bin_width);
        assert!(s.std_dev() > 0.0);
    }

    #[test]
    fn max_edge_value_folds_into_last_bin() {
        let mut m = ScaledStatsMapping::new(0, 64, 64, RecordLayout::Quantized, identity_quant());
        m.add(64); // exactly the maximum
        m.add(63);
        let s = m.finish();
        assert!(s.mean > 62.0 && s.mean < 66.0);
    }

    #[test]
    fn chunk_records_feed_elevations() {
        let mut m =
            ScaledStatsMapping::new(0, 1000, 1024, RecordLayout::Quantized, identity_quant());
        let mut data = vec![0u8; 24];
        encode_quantized(&mut data[..12], QuantizedPoint { x: 1, y: 2, z: 100 });
        encode_quantized(&mut data[12..], QuantizedPoint { x: 3, y: 4, z: 300 });
        m.process(Chunk::new(&mut data, 12, 0, 1.0));
        let s = m.finish();
        assert!((s.mean - 201.0).abs() < 2.0);
    }

    #[test]
    fn statistics_roundtrip() {
        let s = Statistics {
            mean: 123.5,
            variance: 4.25,
            mode: 120.0,
        };
        let mut buf = Vec::new();
        s.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 24);
        assert_eq!(Statistics::read_from(&mut buf.as_slice()).unwrap(), s);
    }
}
