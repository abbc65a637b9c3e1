//! Machine-readable view of a harness: counters, workload statistics and the
//! process environment, in one JSON document.

mod server;

pub use server::ExportServer;

use crate::error::Result;
use crate::harness::{Harness, RunSummary};
use crate::policy::PolicyKind;
use crate::process::EnvironmentStats;
use faultbench_trace::{IntrospectionSnapshot, WorkloadStats};
use serde::Serialize;

pub const SCHEMA: &str = "faultbench.v1";

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub schema: &'static str,
    /// RFC 3339, local time.
    pub captured_at: String,
    pub policy: Option<PolicyKind>,
    pub running: bool,
    pub snapshot: IntrospectionSnapshot,
    pub workload: WorkloadStats,
    pub last_run: Option<RunSummary>,
    pub environment: EnvironmentStats,
}

impl ExportReport {
    pub fn capture(harness: &Harness) -> Self {
        ExportReport {
            schema: SCHEMA,
            captured_at: chrono::Local::now().to_rfc3339(),
            policy: harness.policy(),
            running: harness.is_running(),
            snapshot: harness.report(),
            workload: harness.registry().workload_stats(),
            last_run: harness.last_summary(),
            environment: EnvironmentStats::capture(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    #[test]
    fn test_report_fields() {
        let harness = Harness::new();
        harness
            .start(PolicyKind::Leaking, HarnessConfig::new(0, 25, 1))
            .unwrap();
        harness.stop().unwrap();

        let report = ExportReport::capture(&harness);
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["schema"], SCHEMA);
        assert_eq!(value["policy"], "leaking");
        assert_eq!(value["running"], false);
        assert_eq!(value["snapshot"]["active_handles"], 25);
        assert_eq!(value["snapshot"]["partial"], false);
        assert_eq!(value["workload"]["operations"], 25);
        assert_eq!(value["last_run"]["outcome"], "completed");
        assert!(value["environment"]["pid"].is_i64());
        assert!(
            chrono::DateTime::parse_from_rfc3339(value["captured_at"].as_str().unwrap()).is_ok()
        );
    }

    #[test]
    fn test_report_before_any_run() {
        let report = ExportReport::capture(&Harness::new());
        assert_eq!(report.policy, None);
        assert!(report.last_run.is_none());
        assert_eq!(report.snapshot.cumulative_acquired, 0);
    }
}
