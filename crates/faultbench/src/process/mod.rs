//! Environment-level resource counts for the current process.
//!
//! These are what an outside observer would watch to notice a leak: open
//! descriptors, threads, resident memory and live heap bytes.

mod status;

pub use status::{ProcStatus, open_fd_count};

use faultbench_trace::heap_stats;
use nix::sys::resource::{UsageWho, getrusage};
use nix::sys::time::TimeValLike;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentStats {
    pub pid: i32,
    pub open_fds: Option<u64>,
    pub threads: Option<u64>,
    pub rss_bytes: Option<u64>,
    /// Only present when the counting allocator is installed.
    pub heap_live_bytes: Option<u64>,
    pub heap_total_allocs: Option<u64>,
    pub cpu_user_micros: Option<i64>,
    pub cpu_system_micros: Option<i64>,
}

impl EnvironmentStats {
    /// Best effort: anything that cannot be read is left empty.
    pub fn capture() -> Self {
        let status = ProcStatus::read_self().unwrap_or_default();
        let heap = heap_stats();
        let usage = match getrusage(UsageWho::RUSAGE_SELF) {
            Ok(usage) => Some(usage),
            Err(e) => {
                tracing::debug!(error = %e, "getrusage failed");
                None
            }
        };

        EnvironmentStats {
            pid: nix::unistd::getpid().as_raw(),
            open_fds: open_fd_count(),
            threads: status.threads,
            rss_bytes: status.rss_bytes,
            heap_live_bytes: heap.map(|h| h.live_bytes),
            heap_total_allocs: heap.map(|h| h.total_allocs),
            cpu_user_micros: usage.as_ref().map(|u| u.user_time().num_microseconds()),
            cpu_system_micros: usage.as_ref().map(|u| u.system_time().num_microseconds()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_capture_self() {
        let env = EnvironmentStats::capture();
        assert_eq!(env.pid as u32, std::process::id());
        assert!(env.threads.is_some());
        assert!(env.cpu_user_micros.is_some());
    }
}
