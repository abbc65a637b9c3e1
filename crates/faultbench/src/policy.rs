//! Leaking and correct resource-handling policies.
//!
//! Both policies share one acquisition path, one set of registry hooks and
//! one settle point ([`Policy::settle`]). The only differences are whether a
//! handle is ever released and which growth strategy the synthetic work uses,
//! so a profile of one against the other shows the defect and nothing else.

use crate::costmodel::Growth;
use crate::error::{Error, Result};
use crate::resource::{HandleId, OwnerId, ReleaseOutcome, ResourceHandle};
use faultbench_trace::IntrospectionRegistry;
use serde::Serialize;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Acquire on every operation and never release
    Leaking,
    /// Scoped acquisition, released on every exit path
    Correct,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 2] = [PolicyKind::Leaking, PolicyKind::Correct];

    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Leaking => "leaking",
            PolicyKind::Correct => "correct",
        }
    }

    pub fn is_leaking(&self) -> bool {
        matches!(self, PolicyKind::Leaking)
    }

    /// Growth strategy used by this policy's unit of work.
    pub fn growth(&self) -> Growth {
        match self {
            PolicyKind::Leaking => Growth::Naive,
            PolicyKind::Correct => Growth::Amortized,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leaking" => Ok(PolicyKind::Leaking),
            "correct" => Ok(PolicyKind::Correct),
            other => Err(Error::InvalidArgument(format!(
                "unknown policy '{}', expected 'leaking' or 'correct'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyOptions {
    /// Maximum simultaneously active handles; `None` is unbounded.
    pub ceiling: Option<u64>,
    /// Bytes allocated for each handle at acquisition (the setup cost).
    pub handle_capacity: usize,
}

/// A resource-handling strategy bound to one registry.
pub struct Policy {
    kind: PolicyKind,
    owner: OwnerId,
    next_seq: AtomicU64,
    registry: Arc<IntrospectionRegistry>,
    options: PolicyOptions,
}

impl Policy {
    pub fn new(
        kind: PolicyKind,
        registry: Arc<IntrospectionRegistry>,
        options: PolicyOptions,
    ) -> Self {
        Self {
            kind,
            owner: OwnerId::next(),
            next_seq: AtomicU64::new(0),
            registry,
            options,
        }
    }

    pub fn kind(&self) -> PolicyKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_leaking(&self) -> bool {
        self.kind.is_leaking()
    }

    pub fn growth(&self) -> Growth {
        self.kind.growth()
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub(crate) fn registry(&self) -> &IntrospectionRegistry {
        &self.registry
    }

    /// Acquire a new handle and count it as active.
    ///
    /// Fails with [`Error::Exhausted`] when the ceiling is reached; in that
    /// case nothing was registered and no handle exists.
    pub fn acquire(&self) -> Result<ResourceHandle> {
        self.registry.register_acquire(self.options.ceiling)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        Ok(ResourceHandle::new(
            HandleId::new(self.owner, seq),
            self.options.handle_capacity,
        ))
    }

    /// Release a handle acquired through this policy.
    ///
    /// A second release of the same handle is a no-op that reports
    /// [`ReleaseOutcome::AlreadyReleased`]. A handle from another policy
    /// instance is rejected and left untouched.
    pub fn release(&self, handle: &mut ResourceHandle) -> Result<ReleaseOutcome> {
        if handle.owner() != self.owner {
            tracing::error!(
                handle = %handle.id(),
                caller = %self.owner,
                "release through foreign policy"
            );
            return Err(Error::OwnershipViolation {
                handle: handle.id(),
                owner: handle.owner(),
                caller: self.owner,
            });
        }
        if !handle.mark_released() {
            tracing::warn!(handle = %handle.id(), "handle released twice");
            return Ok(ReleaseOutcome::AlreadyReleased);
        }
        self.registry.register_release()?;
        Ok(ReleaseOutcome::Released)
    }

    /// Acquire a handle wrapped in a guard that settles it when the scope
    /// ends, including on early return and unwinding.
    pub fn lease(&self) -> Result<Lease<'_>> {
        let handle = self.acquire()?;
        Ok(Lease {
            policy: self,
            handle: Some(handle),
        })
    }

    /// End of a handle's use. The one place the two policies diverge.
    fn settle(&self, handle: ResourceHandle) -> Result<()> {
        match self.kind {
            PolicyKind::Correct => {
                let mut handle = handle;
                self.release(&mut handle).map(|_| ())
            }
            PolicyKind::Leaking => {
                handle.abandon();
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("options", &self.options)
            .finish()
    }
}

/// Scoped acquisition: the handle is settled exactly once, either by
/// [`Lease::finish`] or when the guard is dropped.
pub struct Lease<'a> {
    policy: &'a Policy,
    handle: Option<ResourceHandle>,
}

impl Lease<'_> {
    /// Settle the handle now and surface any lifecycle error.
    pub fn finish(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.policy.settle(handle),
            None => Ok(()),
        }
    }
}

impl Deref for Lease<'_> {
    type Target = ResourceHandle;

    fn deref(&self) -> &ResourceHandle {
        // Only `finish` and `drop` take the handle, and both consume the lease.
        self.handle.as_ref().expect("lease handle present until settled")
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut ResourceHandle {
        self.handle.as_mut().expect("lease handle present until settled")
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let id = handle.id();
            if let Err(e) = self.policy.settle(handle) {
                tracing::error!(handle = %id, error = %e, "failed to settle handle on scope exit");
            }
        }
    }
}
