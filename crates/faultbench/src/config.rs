//! Harness configuration.

use crate::error::{Error, Result};
use crate::scenario::{MAX_PAYLOAD_BYTES, MAX_STRING_ITEMS, Scenario, ScenarioKind};
use std::time::Duration;

/// Parameters of the synthetic unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub kind: ScenarioKind,
    /// Item count for the string scenario.
    pub n: usize,
    /// Request size for the connection scenario.
    pub request_bytes: usize,
    /// Body size for the streaming scenario.
    pub payload_bytes: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            kind: ScenarioKind::Connection,
            n: 1000,
            request_bytes: 1024,
            payload_bytes: 1024 * 1024,
        }
    }
}

impl ScenarioConfig {
    /// Only the field the selected scenario uses is checked.
    pub fn build(&self) -> Result<Scenario> {
        match self.kind {
            ScenarioKind::Connection => {
                let size = self.request_bytes as u64;
                if size > MAX_PAYLOAD_BYTES {
                    return Err(Error::PayloadTooLarge {
                        size,
                        max: MAX_PAYLOAD_BYTES,
                    });
                }
                Ok(Scenario::connection(self.request_bytes))
            }
            ScenarioKind::StringBuild => {
                if self.n > MAX_STRING_ITEMS {
                    return Err(Error::InvalidArgument(format!(
                        "string scenario supports at most {} items, got {}",
                        MAX_STRING_ITEMS, self.n
                    )));
                }
                Ok(Scenario::string_build(self.n))
            }
            ScenarioKind::StreamBody => Scenario::stream_body(self.payload_bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Rate ceiling across all workers; 0 runs unthrottled.
    pub ops_per_second: u64,
    pub total_ops: u64,
    /// Maximum operations in flight.
    pub concurrency: usize,
    pub scenario: ScenarioConfig,
    /// Maximum simultaneously active handles.
    pub handle_ceiling: Option<u64>,
    /// Inject a transient failure into every k-th operation.
    pub fail_every: Option<u64>,
    /// How long `stop` waits for the run to finish before cancelling it.
    pub drain_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            ops_per_second: 1000,
            total_ops: 500,
            concurrency: 1,
            scenario: ScenarioConfig::default(),
            handle_ceiling: None,
            fail_every: None,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl HarnessConfig {
    pub fn new(ops_per_second: u64, total_ops: u64, concurrency: usize) -> Self {
        Self {
            ops_per_second,
            total_ops,
            concurrency,
            ..Self::default()
        }
    }

    pub fn with_scenario(mut self, scenario: ScenarioConfig) -> Self {
        self.scenario = scenario;
        self
    }

    pub fn with_ceiling(mut self, ceiling: u64) -> Self {
        self.handle_ceiling = Some(ceiling);
        self
    }

    pub fn with_fail_every(mut self, every: u64) -> Self {
        self.fail_every = Some(every);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidArgument(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.total_ops == 0 {
            return Err(Error::InvalidArgument(
                "total_ops must be at least 1".to_string(),
            ));
        }
        if self.fail_every == Some(0) {
            return Err(Error::InvalidArgument(
                "fail_every must be at least 1".to_string(),
            ));
        }
        self.scenario.build().map(|_| ())
    }
}
