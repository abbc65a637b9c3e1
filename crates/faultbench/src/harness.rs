//! Start/stop/report control surface over one workload at a time.

use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::policy::{Policy, PolicyKind, PolicyOptions};
use crate::workload::{CancelToken, Run, RunOutcome, WorkloadRunner};
use faultbench_trace::{IntrospectionRegistry, IntrospectionSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub policy: PolicyKind,
    pub outcome: RunOutcome,
    /// Results delivered by the run, including failed ones.
    pub operations: u64,
    pub failed_operations: u64,
    pub elapsed_ms: u64,
    /// Set when `stop` had to cancel operations that were still pending.
    pub forced: bool,
    /// Lifecycle error that aborted the run.
    pub fault: Option<String>,
}

struct ActiveRun {
    policy: PolicyKind,
    cancel: CancelToken,
    driver: JoinHandle<RunSummary>,
    drain_timeout: Duration,
}

enum State {
    Idle { last: Option<RunSummary> },
    Running(ActiveRun),
    /// `stop` is draining; the run has been taken out of the state.
    Stopping(PolicyKind),
}

/// Owns an introspection registry and drives at most one run against it.
///
/// Methods take `&self` so a harness can be shared with an export endpoint
/// through an `Arc`.
pub struct Harness {
    registry: Arc<IntrospectionRegistry>,
    state: Mutex<State>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(IntrospectionRegistry::new()))
    }

    pub fn with_registry(registry: Arc<IntrospectionRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(State::Idle { last: None }),
        }
    }

    pub fn registry(&self) -> &Arc<IntrospectionRegistry> {
        &self.registry
    }

    /// Start a run of `policy` in the background.
    pub fn start(&self, policy: PolicyKind, config: HarnessConfig) -> Result<()> {
        config.validate()?;
        let scenario = config.scenario.build()?;

        let mut state = self.state.lock();
        if !matches!(*state, State::Idle { .. }) {
            return Err(Error::AlreadyRunning);
        }

        let options = PolicyOptions {
            ceiling: config.handle_ceiling,
            handle_capacity: scenario.handle_capacity(),
        };
        let policy_impl = Arc::new(Policy::new(policy, Arc::clone(&self.registry), options));
        let runner = WorkloadRunner::new(scenario).with_fail_every(config.fail_every);
        let run = runner.run(
            policy_impl,
            config.ops_per_second,
            config.total_ops,
            config.concurrency,
        )?;
        let cancel = run.cancel_token();

        let driver = std::thread::Builder::new()
            .name("faultbench-driver".to_string())
            .spawn(move || drive(policy, run))?;

        tracing::info!(
            %policy,
            scenario = ?config.scenario.kind,
            ops_per_second = config.ops_per_second,
            total_ops = config.total_ops,
            concurrency = config.concurrency,
            "harness started"
        );

        *state = State::Running(ActiveRun {
            policy,
            cancel,
            driver,
            drain_timeout: config.drain_timeout,
        });
        Ok(())
    }

    /// Stop the current run, waiting up to the configured drain timeout for
    /// in-flight and pending operations before cancelling them.
    pub fn stop(&self) -> Result<RunSummary> {
        self.stop_inner(None)
    }

    /// Like [`stop`](Self::stop) with an explicit drain timeout.
    pub fn stop_within(&self, drain_timeout: Duration) -> Result<RunSummary> {
        self.stop_inner(Some(drain_timeout))
    }

    fn stop_inner(&self, drain_timeout: Option<Duration>) -> Result<RunSummary> {
        let active = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Idle { last: None }) {
                State::Running(active) => {
                    *state = State::Stopping(active.policy);
                    active
                }
                other => {
                    *state = other;
                    return Err(Error::NotRunning);
                }
            }
        };

        let timeout = drain_timeout.unwrap_or(active.drain_timeout);
        let deadline = Instant::now() + timeout;
        while !active.driver.is_finished() && Instant::now() < deadline {
            std::thread::sleep(DRAIN_POLL);
        }
        let forced = !active.driver.is_finished();
        if forced {
            tracing::warn!(
                policy = %active.policy,
                timeout = %humantime::format_duration(timeout),
                "drain timeout elapsed, cancelling pending operations"
            );
            active.cancel.cancel();
        }

        // Joining the driver joins every worker, so no acquisition can
        // happen after this point.
        let mut summary = match active.driver.join() {
            Ok(summary) => summary,
            Err(_) => RunSummary {
                policy: active.policy,
                outcome: RunOutcome::Aborted,
                operations: 0,
                failed_operations: 0,
                elapsed_ms: 0,
                forced,
                fault: Some("workload driver panicked".to_string()),
            },
        };
        summary.forced = forced;

        tracing::info!(
            policy = %summary.policy,
            outcome = ?summary.outcome,
            operations = summary.operations,
            "harness stopped"
        );

        *self.state.lock() = State::Idle {
            last: Some(summary.clone()),
        };
        Ok(summary)
    }

    /// Current counters. `partial` is set while a run is in progress and
    /// after a run that did not complete.
    pub fn report(&self) -> IntrospectionSnapshot {
        let partial = match &*self.state.lock() {
            State::Idle { last } => last
                .as_ref()
                .is_some_and(|s| s.outcome != RunOutcome::Completed),
            State::Running(_) | State::Stopping(_) => true,
        };
        let mut snapshot = self.registry.snapshot();
        snapshot.partial = partial;
        snapshot
    }

    /// Zero the registry. Refused while a run is active.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        match &*state {
            State::Idle { .. } => {
                self.registry.reset();
                *state = State::Idle { last: None };
                tracing::debug!("harness reset");
                Ok(())
            }
            _ => Err(Error::AlreadyRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(*self.state.lock(), State::Idle { .. })
    }

    /// True once every operation of the current run has been executed or the
    /// run ended early; `stop` then returns without waiting.
    pub fn is_finished(&self) -> bool {
        match &*self.state.lock() {
            State::Running(active) => active.driver.is_finished(),
            State::Stopping(_) => false,
            State::Idle { .. } => true,
        }
    }

    /// Policy of the current run, or of the last one.
    pub fn policy(&self) -> Option<PolicyKind> {
        match &*self.state.lock() {
            State::Running(active) => Some(active.policy),
            State::Stopping(policy) => Some(*policy),
            State::Idle { last } => last.as_ref().map(|s| s.policy),
        }
    }

    pub fn last_summary(&self) -> Option<RunSummary> {
        match &*self.state.lock() {
            State::Idle { last } => last.clone(),
            _ => None,
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let state = std::mem::replace(self.state.get_mut(), State::Idle { last: None });
        if let State::Running(active) = state {
            active.cancel.cancel();
            let _ = active.driver.join();
        }
    }
}

/// Consume a run to the end on the driver thread.
fn drive(policy: PolicyKind, mut run: Run) -> RunSummary {
    let start = Instant::now();
    let mut operations = 0;
    let mut failed_operations = 0;
    for result in run.by_ref() {
        operations += 1;
        if !result.success {
            failed_operations += 1;
        }
    }
    RunSummary {
        policy,
        outcome: run.outcome().unwrap_or(RunOutcome::Aborted),
        operations,
        failed_operations,
        elapsed_ms: start.elapsed().as_millis() as u64,
        forced: false,
        fault: run.fault(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScenarioConfig;
    use crate::scenario::ScenarioKind;

    fn quick(total_ops: u64) -> HarnessConfig {
        HarnessConfig::new(0, total_ops, 2).with_scenario(ScenarioConfig {
            request_bytes: 128,
            ..ScenarioConfig::default()
        })
    }

    #[test]
    fn test_start_twice_fails() {
        let harness = Harness::new();
        harness
            .start(PolicyKind::Correct, HarnessConfig::new(10, 1000, 1))
            .unwrap();
        assert!(matches!(
            harness.start(PolicyKind::Correct, quick(10)),
            Err(Error::AlreadyRunning)
        ));
        let summary = harness.stop_within(Duration::ZERO).unwrap();
        assert!(summary.forced);
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
    }

    #[test]
    fn test_stop_uses_configured_drain_timeout() {
        let harness = Harness::new();
        let config = HarnessConfig::new(10, 1000, 1).with_drain_timeout(Duration::from_millis(20));
        harness.start(PolicyKind::Correct, config).unwrap();

        let started = Instant::now();
        let summary = harness.stop().unwrap();
        assert!(summary.forced);
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_stop_without_start_fails() {
        let harness = Harness::new();
        assert!(matches!(harness.stop(), Err(Error::NotRunning)));
    }

    #[test]
    fn test_stop_twice_fails() {
        let harness = Harness::new();
        harness.start(PolicyKind::Correct, quick(20)).unwrap();
        harness.stop().unwrap();
        assert!(matches!(harness.stop(), Err(Error::NotRunning)));
    }

    #[test]
    fn test_restart_after_stop() {
        let harness = Harness::new();
        harness.start(PolicyKind::Leaking, quick(20)).unwrap();
        harness.stop().unwrap();
        harness.start(PolicyKind::Leaking, quick(30)).unwrap();
        let summary = harness.stop().unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        // Counters accumulate until an explicit reset.
        assert_eq!(harness.report().cumulative_acquired, 50);
    }

    #[test]
    fn test_invalid_config_rejected_before_starting() {
        let harness = Harness::new();
        let config = quick(10).with_scenario(ScenarioConfig {
            kind: ScenarioKind::StreamBody,
            payload_bytes: u64::MAX,
            ..ScenarioConfig::default()
        });
        assert!(matches!(
            harness.start(PolicyKind::Correct, config),
            Err(Error::PayloadTooLarge { .. })
        ));
        assert!(!harness.is_running());
    }

    #[test]
    fn test_report_partial_flag() {
        let harness = Harness::new();
        assert!(!harness.report().partial);

        harness
            .start(PolicyKind::Correct, HarnessConfig::new(10, 1000, 1))
            .unwrap();
        assert!(harness.report().partial);
        harness.stop_within(Duration::ZERO).unwrap();
        // Cancelled before completion.
        assert!(harness.report().partial);

        harness.start(PolicyKind::Correct, quick(10)).unwrap();
        harness.stop().unwrap();
        assert!(!harness.report().partial);
    }

    #[test]
    fn test_reset_refused_while_running() {
        let harness = Harness::new();
        harness
            .start(PolicyKind::Correct, HarnessConfig::new(10, 1000, 1))
            .unwrap();
        assert!(matches!(harness.reset(), Err(Error::AlreadyRunning)));
        harness.stop_within(Duration::ZERO).unwrap();

        harness.reset().unwrap();
        let snap = harness.report();
        assert_eq!(snap.cumulative_acquired, 0);
        assert!(!snap.partial);
        assert_eq!(harness.last_summary(), None);
    }

    #[test]
    fn test_drop_while_running() {
        let registry = Arc::new(IntrospectionRegistry::new());
        {
            let harness = Harness::with_registry(Arc::clone(&registry));
            harness
                .start(PolicyKind::Correct, HarnessConfig::new(100, 1_000_000, 2))
                .unwrap();
        }
        let before = registry.snapshot();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.snapshot().cumulative_acquired, before.cumulative_acquired);
        assert_eq!(before.active_handles, 0);
    }
}
