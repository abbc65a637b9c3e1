//! Simulated scarce resources.
//!
//! A [`ResourceHandle`] stands for one acquired unit (a dialed connection, a
//! request body buffer, a built string). It owns real heap memory so that a
//! leaked handle shows up in heap profiles, not only in the counters.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Byte written into fresh handle buffers so their pages are resident.
const FILL_PATTERN: u8 = 0xA5;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of the policy instance that acquired a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OwnerId(u64);

impl OwnerId {
    pub(crate) fn next() -> Self {
        OwnerId(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Opaque handle token, unique across all policies in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HandleId {
    owner: OwnerId,
    seq: u64,
}

impl HandleId {
    pub(crate) fn new(owner: OwnerId, seq: u64) -> Self {
        Self { owner, seq }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/h{}", self.owner, self.seq)
    }
}

/// Result of a release call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The handle was released earlier; counters were left untouched.
    AlreadyReleased,
}

/// One acquired unit of a simulated resource.
///
/// Not `Clone`: the policy that created it is its only owner. Once
/// `released` is set it never changes again.
pub struct ResourceHandle {
    id: HandleId,
    acquired_at: Instant,
    released: bool,
    buffer: Vec<u8>,
}

impl ResourceHandle {
    pub(crate) fn new(id: HandleId, capacity: usize) -> Self {
        Self {
            id,
            acquired_at: Instant::now(),
            released: false,
            buffer: vec![FILL_PATTERN; capacity],
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.id.owner
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    pub fn age(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Flip to released and free the backing memory.
    /// Returns false if the handle was already released.
    pub(crate) fn mark_released(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.buffer = Vec::new();
        true
    }

    /// Drop every reference to this handle without releasing it.
    ///
    /// The backing buffer is never freed.
    pub(crate) fn abandon(self) {
        std::mem::forget(self);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("released", &self.released)
            .field("buffer_len", &self.buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_ids_are_unique() {
        let a = OwnerId::next();
        let b = OwnerId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_buffer_is_filled() {
        let handle = ResourceHandle::new(HandleId::new(OwnerId::next(), 0), 128);
        assert_eq!(handle.buffer().len(), 128);
        assert!(handle.buffer().iter().all(|&b| b == FILL_PATTERN));
        assert!(!handle.is_released());
    }

    #[test]
    fn test_mark_released_is_terminal() {
        let mut handle = ResourceHandle::new(HandleId::new(OwnerId::next(), 7), 64);
        assert!(handle.mark_released());
        assert!(handle.is_released());
        assert!(handle.buffer().is_empty());
        assert!(!handle.mark_released());
        assert!(handle.is_released());
    }

    #[test]
    fn test_handle_id_display() {
        let owner = OwnerId(3);
        assert_eq!(HandleId::new(owner, 12).to_string(), "p3/h12");
    }
}
