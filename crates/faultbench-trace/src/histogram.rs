//! Lock-free log2 histogram.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket 0 holds zero; bucket `i` holds values in `[2^(i-1), 2^i)`.
const BUCKETS: usize = 65;

/// A fixed-size histogram with power-of-two buckets.
///
/// Recording is a handful of relaxed atomic adds, so it can sit on the hot
/// path of every operation without a lock.
#[derive(Debug)]
pub struct Log2Histogram {
    buckets: [AtomicU64; BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

/// One non-empty bucket of a [`HistogramSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    /// Exclusive upper bound of the bucket (`u64::MAX` for the last one).
    pub upper_bound: u64,
    pub count: u64,
}

/// Point-in-time copy of a [`Log2Histogram`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub max: u64,
    pub buckets: Vec<Bucket>,
}

#[inline]
fn bucket_index(value: u64) -> usize {
    (u64::BITS - value.leading_zeros()) as usize
}

fn upper_bound(index: usize) -> u64 {
    match index {
        0 => 1,
        64 => u64::MAX,
        i => 1u64 << i,
    }
}

impl Log2Histogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    pub fn record(&self, value: u64) {
        self.buckets[bucket_index(value)].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.store(0, Ordering::Relaxed);
        }
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let buckets = self
            .buckets
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                let count = b.load(Ordering::Relaxed);
                (count > 0).then(|| Bucket {
                    upper_bound: upper_bound(i),
                    count,
                })
            })
            .collect();

        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum: self.sum.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
            buckets,
        }
    }
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl HistogramSnapshot {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    /// Upper bound of the bucket containing quantile `q` (0.0..=1.0).
    pub fn quantile(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        let target = ((self.count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for bucket in &self.buckets {
            seen += bucket.count;
            if seen >= target {
                return bucket.upper_bound.min(self.max.max(1));
            }
        }
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1), 1);
        assert_eq!(bucket_index(2), 2);
        assert_eq!(bucket_index(3), 2);
        assert_eq!(bucket_index(1024), 11);
        assert_eq!(bucket_index(u64::MAX), 64);
    }

    #[test]
    fn test_snapshot_counts() {
        let h = Log2Histogram::new();
        for v in [0, 1, 5, 6, 7, 1000] {
            h.record(v);
        }
        let snap = h.snapshot();
        assert_eq!(snap.count, 6);
        assert_eq!(snap.sum, 1019);
        assert_eq!(snap.max, 1000);
        assert_eq!(snap.buckets.iter().map(|b| b.count).sum::<u64>(), 6);
        // 5, 6, 7 share the [4, 8) bucket
        assert!(snap.buckets.contains(&Bucket { upper_bound: 8, count: 3 }));
    }

    #[test]
    fn test_quantile_and_reset() {
        let h = Log2Histogram::new();
        for _ in 0..99 {
            h.record(10);
        }
        h.record(100_000);
        let snap = h.snapshot();
        assert_eq!(snap.quantile(0.5), 16);
        assert_eq!(snap.quantile(1.0), 100_000);

        h.reset();
        assert_eq!(h.snapshot(), HistogramSnapshot::default());
    }
}
