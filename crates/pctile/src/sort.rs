//! Bulk numeric sort used by the precision probe.
//!
//! Partition into value-range buckets, sort each bucket in parallel,
//! then concatenate. The fan-out has no suspension points and joins
//! before returning, so it is safe to call from a streaming pass.

use rayon::prelude::*;

const BUCKET_BITS: u32 = 8;
const BUCKETS: usize = 1 << BUCKET_BITS;

/// Sorts `values` ascending in place.
pub fn par_bucket_sort(values: &mut Vec<i32>) {
    if values.len() < 1 << 16 {
        values.sort_unstable();
        return;
    }

    // bucket by the high bits of the offset-from-min value
    let min = *values.iter().min().unwrap();
    let max = *values.iter().max().unwrap();
    let span = max.wrapping_sub(min) as u32 as u64 + 1;
    let per_bucket = (span / BUCKETS as u64).max(1);

    let mut buckets: Vec<Vec<i32>> = (0..BUCKETS).map(|_| Vec::new()).collect();
    for &v in values.iter() {
        let slot = ((v.wrapping_sub(min) as u32 as u64) / per_bucket).min(BUCKETS as u64 - 1);
        buckets[slot as usize].push(v);
    }

    buckets
        .par_iter_mut()
        .for_each(|bucket| bucket.sort_unstable());

    values.clear();
    for bucket in buckets {
        values.extend_from_slice(&bucket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_small_input() {
        let mut v = vec![5, -3, 12, 0, -3];
        par_bucket_sort(&mut v);
        assert_eq!(v, vec![-3, -3, 0, 5, 12]);
    }

    #[test]
    fn sorts_large_input() {
        // deterministic pseudo-random fill spanning the full i32 range
        let mut state = 0x2545f491u32;
        let mut v: Vec<i32> = (0..200_000)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                state as i32
            })
            .collect();
        let mut expected = v.clone();
        expected.sort_unstable();
        par_bucket_sort(&mut v);
        assert_eq!(v, expected);
    }
}
