//! Real-coordinate bounding extents.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::{Error, Result};

/// Immutable 3D bounding box. `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    min: [f64; 3],
    max: [f64; 3],
}

impl Extent {
    pub fn new(min: [f64; 3], max: [f64; 3]) -> Result<Self> {
        let range = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
        if !range.iter().all(|r| r.is_finite() && *r > 0.0) {
            return Err(Error::DegenerateExtent(range[0], range[1], range[2]));
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn min(&self) -> [f64; 3] {
        self.min
    }

    #[inline]
    pub fn max(&self) -> [f64; 3] {
        self.max
    }

    #[inline]
    pub fn range_x(&self) -> f64 {
        self.max[0] - self.min[0]
    }

    #[inline]
    pub fn range_y(&self) -> f64 {
        self.max[1] - self.min[1]
    }

    #[inline]
    pub fn range_z(&self) -> f64 {
        self.max[2] - self.min[2]
    }

    pub fn midpoint(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// XY footprint area.
    pub fn area(&self) -> f64 {
        self.range_x() * self.range_y()
    }

    /// Width over height of the XY footprint.
    pub fn aspect(&self) -> f64 {
        self.range_x() / self.range_y()
    }

    #[inline]
    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        x >= self.min[0] && x <= self.max[0] && y >= self.min[1] && y <= self.max[1]
    }

    /// Serialized field order matches the LAS header layout:
    /// max then min, per axis, X then Y then Z.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for axis in 0..3 {
            w.write_f64::<LittleEndian>(self.max[axis])?;
            w.write_f64::<LittleEndian>(self.min[axis])?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> std::io::Result<Self> {
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for axis in 0..3 {
            max[axis] = r.read_f64::<LittleEndian>()?;
            min[axis] = r.read_f64::<LittleEndian>()?;
        }
        Ok(Self { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_measures() {
        let e = Extent::new([0.0, 0.0, 0.0], [1000.0, 500.0, 100.0]).unwrap();
        assert_eq!(e.range_x(), 1000.0);
        assert_eq!(e.area(), 500_000.0);
        assert_eq!(e.aspect(), 2.0);
        assert_eq!(e.midpoint(), [500.0, 250.0, 50.0]);
    }

    #[test]
    fn rejects_degenerate() {
        assert!(Extent::new([0.0, 0.0, 0.0], [1.0, 0.0, 1.0]).is_err());
        assert!(Extent::new([2.0, 0.0, 0.0], [1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn las_field_order_roundtrip() {
        let e = Extent::new([-3.5, 10.0, 0.25], [7.5, 20.0, 9.75]).unwrap();
        let mut buf = Vec::new();
        e.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 48);
        // first double is maxX, second is minX
        assert_eq!(f64::from_le_bytes(buf[0..8].try_into().unwrap()), 7.5);
        assert_eq!(f64::from_le_bytes(buf[8..16].try_into().unwrap()), -3.5);
        let back = Extent::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back, e);
    }
}
