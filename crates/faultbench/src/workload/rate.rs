//! Shared rate ceiling and cancellation token for workload workers.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single sleep while waiting for a slot, so cancellation is seen
/// promptly even at low rates.
const MAX_SLEEP: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag shared by a run and its controller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Hands out evenly spaced start slots to all workers of a run.
///
/// Slots never accumulate while workers are idle, so the rate is a ceiling
/// and never a burst allowance.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `ops_per_second == 0` disables throttling.
    pub fn per_second(ops_per_second: u64) -> Self {
        let interval = match ops_per_second {
            0 => None,
            ops => Some(Duration::from_nanos(1_000_000_000 / ops)).filter(|d| !d.is_zero()),
        };
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    fn reserve(&self, interval: Duration) -> Instant {
        let now = Instant::now();
        let mut next = self.next_slot.lock();
        let slot = match *next {
            Some(t) if t > now => t,
            _ => now,
        };
        *next = Some(slot + interval);
        slot
    }

    /// Block until this caller's slot starts. Returns false if `cancel` fired
    /// first.
    pub fn wait(&self, cancel: &CancelToken) -> bool {
        let Some(interval) = self.interval else {
            return !cancel.is_cancelled();
        };
        let slot = self.reserve(interval);
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= slot {
                return true;
            }
            std::thread::sleep((slot - now).min(MAX_SLEEP));
        }
    }
}
