//! Introspection counters for faultbench workloads.
//!
//! This crate holds the state an external exporter reads while a workload is
//! running:
//! - **Handle counters**: acquisitions and releases of simulated resources,
//!   read together so `active == acquired - released` holds in every snapshot
//! - **Workload counters**: operations, failures, bytes moved and the
//!   allocation/copy cost of the synthetic work, plus log2 histograms
//! - **Heap counters**: an opt-in global allocator that counts live heap bytes
//!
//! # Usage
//!
//! ```rust
//! use faultbench_trace::IntrospectionRegistry;
//!
//! let registry = IntrospectionRegistry::new();
//! registry.register_acquire(None).unwrap();
//! let snap = registry.snapshot();
//! assert_eq!(snap.active_handles, 1);
//! ```
//!
//! Install the counting allocator in a binary with one line:
//! ```rust,ignore
//! faultbench_trace::counting_allocator!();
//! ```

mod alloc;
mod histogram;
mod registry;

pub use alloc::{CountingAllocator, HeapStats, heap_stats};
pub use histogram::{HistogramSnapshot, Log2Histogram};
pub use registry::{IntrospectionRegistry, IntrospectionSnapshot, RegistryError, WorkloadStats};

/// Install [`CountingAllocator`] as the process global allocator.
///
/// Only binaries should call this; libraries and tests leave the system
/// allocator in place and report heap counts as unavailable.
#[macro_export]
macro_rules! counting_allocator {
    () => {
        #[global_allocator]
        static __FAULTBENCH_ALLOC: $crate::CountingAllocator = $crate::CountingAllocator::new();
    };
}
