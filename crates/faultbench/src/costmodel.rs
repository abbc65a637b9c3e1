//! Growable string buffer with two growth strategies.
//!
//! `Naive` behaves like repeated immutable-string concatenation: every append
//! allocates a new buffer and copies the whole prefix, so building `n` items
//! copies O(n²) bytes. `Amortized` doubles capacity when it runs out, so the
//! same build copies O(n) bytes with O(log n) allocations.

use serde::Serialize;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Smallest capacity the amortized strategy allocates.
const MIN_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Growth {
    /// Reallocate and copy on every append
    Naive,
    /// Double capacity when full
    Amortized,
}

/// Allocation and copy cost accumulated by a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CostMeter {
    pub allocations: u64,
    pub bytes_copied: u64,
}

#[derive(Debug, Clone)]
pub struct GrowBuf {
    data: String,
    growth: Growth,
    meter: CostMeter,
}

impl GrowBuf {
    pub fn new(growth: Growth) -> Self {
        Self {
            data: String::new(),
            growth,
            meter: CostMeter::default(),
        }
    }

    /// Pre-size the buffer. Ignored by the naive strategy, which like an
    /// immutable string has no spare capacity to reserve.
    pub fn with_capacity(growth: Growth, capacity: usize) -> Self {
        let mut buf = Self::new(growth);
        if growth == Growth::Amortized && capacity > 0 {
            buf.data = String::with_capacity(capacity);
            buf.meter.allocations += 1;
        }
        buf
    }

    pub fn push_str(&mut self, s: &str) {
        match self.growth {
            Growth::Naive => {
                let mut next = String::with_capacity(self.data.len() + s.len());
                next.push_str(&self.data);
                next.push_str(s);
                self.meter.allocations += 1;
                self.meter.bytes_copied += next.len() as u64;
                self.data = next;
            }
            Growth::Amortized => {
                let needed = self.data.len() + s.len();
                if needed > self.data.capacity() {
                    let capacity = needed.max(self.data.capacity() * 2).max(MIN_CAPACITY);
                    let mut next = String::with_capacity(capacity);
                    next.push_str(&self.data);
                    self.meter.allocations += 1;
                    self.meter.bytes_copied += self.data.len() as u64;
                    self.data = next;
                }
                self.data.push_str(s);
                self.meter.bytes_copied += s.len() as u64;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn growth(&self) -> Growth {
        self.growth
    }

    pub fn meter(&self) -> CostMeter {
        self.meter
    }

    pub fn as_str(&self) -> &str {
        &self.data
    }

    pub fn into_string(self) -> String {
        self.data
    }
}

/// Build the `item_0,item_1,...` payload with `n` items.
///
/// Each item is formatted into a scratch string first so that every item
/// costs exactly one append, whichever growth strategy is used.
pub fn build_items(n: usize, growth: Growth) -> GrowBuf {
    let mut buf = GrowBuf::new(growth);
    let mut scratch = String::with_capacity(24);
    for i in 0..n {
        scratch.clear();
        let _ = write!(scratch, "item_{},", i);
        buf.push_str(&scratch);
    }
    buf
}

/// Cost of one build under one growth strategy.
#[derive(Debug, Clone, Serialize)]
pub struct CostSample {
    pub growth: Growth,
    pub allocations: u64,
    pub bytes_copied: u64,
    pub output_len: usize,
    #[serde(rename = "elapsed_nanos", serialize_with = "serialize_nanos")]
    pub elapsed: Duration,
}

impl CostSample {
    pub fn measure(n: usize, growth: Growth) -> Self {
        let start = Instant::now();
        let buf = build_items(n, growth);
        let elapsed = start.elapsed();
        let meter = buf.meter();
        Self {
            growth,
            allocations: meter.allocations,
            bytes_copied: meter.bytes_copied,
            output_len: buf.len(),
            elapsed,
        }
    }
}

/// Naive vs amortized growth for the same item count.
#[derive(Debug, Clone, Serialize)]
pub struct CostComparison {
    pub n: usize,
    pub naive: CostSample,
    pub amortized: CostSample,
}

impl CostComparison {
    pub fn measure(n: usize) -> Self {
        Self {
            n,
            naive: CostSample::measure(n, Growth::Naive),
            amortized: CostSample::measure(n, Growth::Amortized),
        }
    }

    /// How many times more bytes the naive build copied.
    pub fn copy_ratio(&self) -> f64 {
        if self.amortized.bytes_copied == 0 {
            return 0.0;
        }
        self.naive.bytes_copied as f64 / self.amortized.bytes_copied as f64
    }
}

fn serialize_nanos<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_strategies_build_identical_output() {
        let naive = build_items(250, Growth::Naive);
        let amortized = build_items(250, Growth::Amortized);
        assert_eq!(naive.as_str(), amortized.as_str());
        assert!(naive.as_str().starts_with("item_0,item_1,"));
        assert!(naive.as_str().ends_with("item_249,"));
    }

    #[test]
    fn test_naive_allocates_once_per_append() {
        let buf = build_items(100, Growth::Naive);
        assert_eq!(buf.meter().allocations, 100);
    }

    #[test]
    fn test_amortized_allocations_are_logarithmic() {
        let buf = build_items(10_000, Growth::Amortized);
        // ~99KB output from a 64 byte start doubles about 11 times.
        assert!(buf.meter().allocations <= 16, "{:?}", buf.meter());
    }

    #[test]
    fn test_presized_buffer_allocates_once() {
        let mut buf = GrowBuf::with_capacity(Growth::Amortized, 1000 * 12);
        for i in 0..1000 {
            buf.push_str(&format!("item_{},", i));
        }
        assert_eq!(buf.meter().allocations, 1);
        assert_eq!(buf.meter().bytes_copied, buf.len() as u64);
    }

    #[test]
    fn test_naive_copies_quadratic_bytes() {
        for n in [1_000usize, 10_000] {
            let copied = build_items(n, Growth::Naive).meter().bytes_copied;
            let n2 = (n * n) as u64;
            // Items are 7..=10 bytes, so the copied prefix sum sits between
            // 3.5 n² and 5 n².
            assert!(copied >= n2 * 3, "n={n} copied={copied}");
            assert!(copied <= n2 * 6, "n={n} copied={copied}");
        }
    }

    #[test]
    fn test_amortized_copies_linear_bytes() {
        for n in [1_000usize, 10_000] {
            let buf = build_items(n, Growth::Amortized);
            let copied = buf.meter().bytes_copied;
            assert!(copied >= buf.len() as u64);
            assert!(copied <= 40 * n as u64, "n={n} copied={copied}");
        }
    }

    #[test]
    fn test_naive_exceeds_linear_by_10x_at_1000() {
        let cmp = CostComparison::measure(1_000);
        assert_eq!(cmp.naive.output_len, cmp.amortized.output_len);
        assert!(cmp.copy_ratio() >= 10.0, "ratio {}", cmp.copy_ratio());
    }
}
