//! Handle and workload counters shared between workers and the exporter.

use crate::histogram::{HistogramSnapshot, Log2Histogram};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource ceiling of {ceiling} active handles reached")]
    CeilingReached { ceiling: u64 },

    #[error("release recorded with no matching acquisition ({acquired} acquired, {released} released)")]
    Underflow { acquired: u64, released: u64 },
}

/// Acquisition and release totals. Guarded by one mutex so that a reader
/// always sees a pair produced by the same sequence of events.
#[derive(Debug, Default, Clone, Copy)]
struct HandleCounters {
    acquired: u64,
    released: u64,
}

impl HandleCounters {
    fn active(&self) -> u64 {
        self.acquired - self.released
    }
}

/// Handle counts at one instant.
///
/// `active_handles == cumulative_acquired - cumulative_released` always holds
/// for snapshots produced by [`IntrospectionRegistry::snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntrospectionSnapshot {
    pub active_handles: u64,
    pub cumulative_acquired: u64,
    pub cumulative_released: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Set by the owner of the registry when the run that produced these
    /// counts did not complete.
    pub partial: bool,
}

impl IntrospectionSnapshot {
    pub fn is_consistent(&self) -> bool {
        self.cumulative_released <= self.cumulative_acquired
            && self.active_handles == self.cumulative_acquired - self.cumulative_released
    }
}

/// Aggregate cost of the synthetic workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadStats {
    pub operations: u64,
    pub failed_operations: u64,
    pub bytes_moved: u64,
    pub allocations: u64,
    pub bytes_copied: u64,
    pub peak_active_handles: u64,
    pub latency_nanos: HistogramSnapshot,
    pub bytes_per_operation: HistogramSnapshot,
}

/// Counters for one harness.
///
/// Owned through an `Arc` by whoever drives the workload; nothing here is a
/// process-wide singleton, so independent registries never interfere.
#[derive(Debug)]
pub struct IntrospectionRegistry {
    handles: Mutex<HandleCounters>,
    peak_active: AtomicU64,
    operations: AtomicU64,
    failed_operations: AtomicU64,
    bytes_moved: AtomicU64,
    allocations: AtomicU64,
    bytes_copied: AtomicU64,
    latency: Log2Histogram,
    payload: Log2Histogram,
}

impl IntrospectionRegistry {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HandleCounters::default()),
            peak_active: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            failed_operations: AtomicU64::new(0),
            bytes_moved: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            latency: Log2Histogram::new(),
            payload: Log2Histogram::new(),
        }
    }

    /// Count one acquisition unless `ceiling` active handles already exist.
    ///
    /// The ceiling check and the increment happen in the same critical
    /// section: a rejected acquisition leaves no trace in the counters.
    /// Returns the number of active handles after the acquisition.
    pub fn register_acquire(&self, ceiling: Option<u64>) -> Result<u64, RegistryError> {
        let mut counters = self.handles.lock();
        if let Some(ceiling) = ceiling
            && counters.active() >= ceiling
        {
            return Err(RegistryError::CeilingReached { ceiling });
        }
        counters.acquired += 1;
        let active = counters.active();
        drop(counters);

        self.peak_active.fetch_max(active, Ordering::Relaxed);
        Ok(active)
    }

    /// Count one release. Returns the number of active handles afterwards.
    pub fn register_release(&self) -> Result<u64, RegistryError> {
        let mut counters = self.handles.lock();
        if counters.released >= counters.acquired {
            return Err(RegistryError::Underflow {
                acquired: counters.acquired,
                released: counters.released,
            });
        }
        counters.released += 1;
        Ok(counters.active())
    }

    pub fn record_operation(&self, duration_nanos: u64, bytes_moved: u64, success: bool) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_operations.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_moved.fetch_add(bytes_moved, Ordering::Relaxed);
        self.latency.record(duration_nanos);
        self.payload.record(bytes_moved);
    }

    /// Add the allocation count and copied bytes of one unit of work.
    pub fn record_cost(&self, allocations: u64, bytes_copied: u64) {
        self.allocations.fetch_add(allocations, Ordering::Relaxed);
        self.bytes_copied.fetch_add(bytes_copied, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IntrospectionSnapshot {
        let counters = *self.handles.lock();
        IntrospectionSnapshot {
            active_handles: counters.active(),
            cumulative_acquired: counters.acquired,
            cumulative_released: counters.released,
            timestamp_ms: now_ms(),
            partial: false,
        }
    }

    pub fn workload_stats(&self) -> WorkloadStats {
        WorkloadStats {
            operations: self.operations.load(Ordering::Relaxed),
            failed_operations: self.failed_operations.load(Ordering::Relaxed),
            bytes_moved: self.bytes_moved.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            peak_active_handles: self.peak_active.load(Ordering::Relaxed),
            latency_nanos: self.latency.snapshot(),
            bytes_per_operation: self.payload.snapshot(),
        }
    }

    /// Zero every counter. Callers must make sure no workload is running.
    pub fn reset(&self) {
        *self.handles.lock() = HandleCounters::default();
        self.peak_active.store(0, Ordering::Relaxed);
        self.operations.store(0, Ordering::Relaxed);
        self.failed_operations.store(0, Ordering::Relaxed);
        self.bytes_moved.store(0, Ordering::Relaxed);
        self.allocations.store(0, Ordering::Relaxed);
        self.bytes_copied.store(0, Ordering::Relaxed);
        self.latency.reset();
        self.payload.reset();
    }
}

impl Default for IntrospectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_acquire_release_counts() {
        let registry = IntrospectionRegistry::new();
        assert_eq!(registry.register_acquire(None), Ok(1));
        assert_eq!(registry.register_acquire(None), Ok(2));
        assert_eq!(registry.register_release(), Ok(1));

        let snap = registry.snapshot();
        assert_eq!(snap.active_handles, 1);
        assert_eq!(snap.cumulative_acquired, 2);
        assert_eq!(snap.cumulative_released, 1);
        assert!(snap.is_consistent());
        assert!(!snap.partial);
    }

    #[test]
    fn test_ceiling_rejects_without_partial_state() {
        let registry = IntrospectionRegistry::new();
        registry.register_acquire(Some(2)).unwrap();
        registry.register_acquire(Some(2)).unwrap();

        let before = registry.snapshot();
        assert_eq!(
            registry.register_acquire(Some(2)),
            Err(RegistryError::CeilingReached { ceiling: 2 })
        );
        let after = registry.snapshot();
        assert_eq!(before.cumulative_acquired, after.cumulative_acquired);
        assert_eq!(after.active_handles, 2);

        // Releasing frees room under the ceiling again.
        registry.register_release().unwrap();
        assert_eq!(registry.register_acquire(Some(2)), Ok(2));
    }

    #[test]
    fn test_release_without_acquire_is_surfaced() {
        let registry = IntrospectionRegistry::new();
        assert_eq!(
            registry.register_release(),
            Err(RegistryError::Underflow {
                acquired: 0,
                released: 0
            })
        );
        assert_eq!(registry.snapshot().cumulative_released, 0);
    }

    #[test]
    fn test_workload_stats_and_reset() {
        let registry = IntrospectionRegistry::new();
        registry.register_acquire(None).unwrap();
        registry.record_operation(1_500, 64, true);
        registry.record_operation(3_000, 0, false);
        registry.record_cost(3, 96);

        let stats = registry.workload_stats();
        assert_eq!(stats.operations, 2);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.bytes_moved, 64);
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.bytes_copied, 96);
        assert_eq!(stats.peak_active_handles, 1);
        assert_eq!(stats.latency_nanos.count, 2);

        registry.reset();
        assert_eq!(registry.workload_stats(), WorkloadStats::default());
        assert_eq!(registry.snapshot().cumulative_acquired, 0);
    }

    #[test]
    fn test_snapshot_consistent_under_concurrency() {
        let registry = Arc::new(IntrospectionRegistry::new());
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..5_000 {
                        registry.register_acquire(None).unwrap();
                        registry.register_release().unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let registry = Arc::clone(&registry);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                let mut observed = 0u64;
                loop {
                    let snap = registry.snapshot();
                    assert!(snap.is_consistent(), "inconsistent snapshot: {snap:?}");
                    assert!(snap.active_handles <= 4);
                    observed += 1;
                    if done.load(Ordering::Acquire) {
                        break observed;
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);

        let snap = registry.snapshot();
        assert_eq!(snap.active_handles, 0);
        assert_eq!(snap.cumulative_acquired, 20_000);
        assert_eq!(snap.cumulative_released, 20_000);
    }

    #[test]
    fn test_snapshot_serializes_stable_field_names() {
        let registry = IntrospectionRegistry::new();
        registry.register_acquire(None).unwrap();
        let value = serde_json::to_value(registry.snapshot()).unwrap();
        for field in [
            "active_handles",
            "cumulative_acquired",
            "cumulative_released",
            "timestamp_ms",
            "partial",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
    }
}
