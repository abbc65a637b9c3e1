//! Drives operations against a policy from a pool of worker threads.
//!
//! Workers take owned clones of everything they use at spawn time and hand
//! each `OperationResult` back by value over a channel. A run is consumed as
//! an iterator and cannot be restarted.

mod rate;

pub use rate::{CancelToken, RateLimiter};

use crate::error::{Error, OpErrorKind, Result};
use crate::policy::Policy;
use crate::scenario::Scenario;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

/// Result of one operation. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    /// Submission index within the run.
    pub seq: u64,
    pub success: bool,
    pub duration_nanos: u64,
    pub bytes_moved: u64,
    pub error: Option<OpErrorKind>,
}

impl OperationResult {
    fn succeeded(seq: u64, duration_nanos: u64, bytes_moved: u64) -> Self {
        Self {
            seq,
            success: true,
            duration_nanos,
            bytes_moved,
            error: None,
        }
    }

    fn failed(seq: u64, duration_nanos: u64, kind: OpErrorKind) -> Self {
        Self {
            seq,
            success: false,
            duration_nanos,
            bytes_moved: 0,
            error: Some(kind),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every requested operation was executed.
    Completed,
    /// The resource ceiling was reached.
    Exhausted,
    /// Cancelled before every operation was executed.
    Cancelled,
    /// A lifecycle invariant was violated or a worker panicked.
    Aborted,
}

/// Issues operations for one scenario.
#[derive(Debug, Clone)]
pub struct WorkloadRunner {
    scenario: Scenario,
    fail_every: Option<u64>,
}

impl WorkloadRunner {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            fail_every: None,
        }
    }

    pub fn with_fail_every(mut self, every: Option<u64>) -> Self {
        self.fail_every = every.filter(|&k| k > 0);
        self
    }

    /// Start `total_ops` operations against `policy` with at most
    /// `concurrency` in flight and at most `ops_per_second` started per
    /// second (0 = unthrottled).
    pub fn run(
        &self,
        policy: Arc<Policy>,
        ops_per_second: u64,
        total_ops: u64,
        concurrency: usize,
    ) -> Result<Run> {
        if concurrency == 0 {
            return Err(Error::InvalidArgument(
                "concurrency must be at least 1".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            policy,
            scenario: self.scenario.clone(),
            fail_every: self.fail_every,
            total_ops,
            next_seq: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            limiter: RateLimiter::per_second(ops_per_second),
            cancel: CancelToken::new(),
            exhausted: AtomicBool::new(false),
            fault: Mutex::new(None),
        });

        tracing::debug!(
            policy = %shared.policy.kind(),
            scenario = ?self.scenario.kind(),
            total_ops,
            concurrency,
            ops_per_second,
            "starting workload run"
        );

        let (tx, rx) = mpsc::channel();
        let mut workers = Vec::with_capacity(concurrency);
        for index in 0..concurrency {
            let worker_shared = Arc::clone(&shared);
            let tx = tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("faultbench-worker-{}", index))
                .spawn(move || worker_loop(worker_shared, tx));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shared.cancel.cancel();
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(Error::Io(e));
                }
            }
        }

        Ok(Run {
            rx,
            workers,
            shared,
            delivered: 0,
            outcome: None,
        })
    }
}

/// State every worker of a run holds a reference to.
struct Shared {
    policy: Arc<Policy>,
    scenario: Scenario,
    fail_every: Option<u64>,
    total_ops: u64,
    next_seq: AtomicU64,
    executed: AtomicU64,
    limiter: RateLimiter,
    cancel: CancelToken,
    exhausted: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl Shared {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
            || self.exhausted.load(Ordering::SeqCst)
            || self.fault.lock().is_some()
    }

    fn injects_fault(&self, seq: u64) -> bool {
        self.fail_every.is_some_and(|k| (seq + 1) % k == 0)
    }

    /// Acquire, work, settle, record. Settling happens on the failure path
    /// too; only lifecycle errors escape.
    fn execute(&self, seq: u64) -> Result<OperationResult> {
        let start = Instant::now();
        let mut lease = self.policy.lease()?;
        let work = if self.injects_fault(seq) {
            Err(OpErrorKind::Transient)
        } else {
            self.scenario.perform(&mut lease, self.policy.growth())
        };
        lease.finish()?;
        let duration_nanos = start.elapsed().as_nanos() as u64;

        let registry = self.policy.registry();
        let result = match work {
            Ok(work) => {
                registry.record_cost(work.cost.allocations, work.cost.bytes_copied);
                OperationResult::succeeded(seq, duration_nanos, work.bytes_moved)
            }
            Err(kind) => OperationResult::failed(seq, duration_nanos, kind),
        };
        registry.record_operation(result.duration_nanos, result.bytes_moved, result.success);
        Ok(result)
    }
}

fn worker_loop(shared: Arc<Shared>, tx: Sender<OperationResult>) {
    loop {
        if shared.should_stop() {
            break;
        }
        let seq = shared.next_seq.fetch_add(1, Ordering::SeqCst);
        if seq >= shared.total_ops {
            break;
        }
        if !shared.limiter.wait(&shared.cancel) {
            break;
        }

        let result = match shared.execute(seq) {
            Ok(result) => result,
            Err(Error::Exhausted { ceiling }) => {
                if !shared.exhausted.swap(true, Ordering::SeqCst) {
                    tracing::warn!(ceiling, seq, "resource ceiling reached, aborting run");
                }
                shared.policy.registry().record_operation(0, 0, false);
                OperationResult::failed(seq, 0, OpErrorKind::Exhausted)
            }
            Err(e) => {
                tracing::error!(error = %e, seq, "lifecycle invariant violated, aborting run");
                *shared.fault.lock() = Some(e.to_string());
                break;
            }
        };

        if result.error != Some(OpErrorKind::Exhausted) {
            shared.executed.fetch_add(1, Ordering::SeqCst);
        }
        let last = result.error == Some(OpErrorKind::Exhausted);
        if tx.send(result).is_err() || last {
            break;
        }
    }
}

/// A running workload, consumed as a lazy sequence of results in completion
/// order. Dropping a run cancels it and joins its workers.
pub struct Run {
    rx: Receiver<OperationResult>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
    delivered: u64,
    outcome: Option<RunOutcome>,
}

impl Run {
    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Results yielded so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Known once the iterator has returned `None`.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    /// Message of the lifecycle error that aborted the run, if any.
    pub fn fault(&self) -> Option<String> {
        self.shared.fault.lock().clone()
    }

    fn join_workers(&mut self) -> bool {
        let mut panicked = false;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                panicked = true;
            }
        }
        panicked
    }

    fn finish(&mut self) -> RunOutcome {
        if let Some(outcome) = self.outcome {
            return outcome;
        }
        let panicked = self.join_workers();
        let shared = &self.shared;
        let outcome = if panicked || shared.fault.lock().is_some() {
            RunOutcome::Aborted
        } else if shared.exhausted.load(Ordering::SeqCst) {
            RunOutcome::Exhausted
        } else if shared.executed.load(Ordering::SeqCst) >= shared.total_ops {
            RunOutcome::Completed
        } else {
            RunOutcome::Cancelled
        };
        tracing::debug!(?outcome, delivered = self.delivered, "workload run finished");
        self.outcome = Some(outcome);
        outcome
    }
}

impl Iterator for Run {
    type Item = OperationResult;

    fn next(&mut self) -> Option<OperationResult> {
        if self.outcome.is_some() {
            return None;
        }
        match self.rx.recv() {
            Ok(result) => {
                self.delivered += 1;
                Some(result)
            }
            Err(_) => {
                // Every worker dropped its sender.
                self.finish();
                None
            }
        }
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.shared.cancel.cancel();
            self.finish();
        }
    }
}
