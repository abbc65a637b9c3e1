use super::{check_outcome, format_bytes, format_nanos, outcome_label, stop, wait_for};
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::harness::{Harness, RunSummary};
use crate::policy::PolicyKind;
use comfy_table::{CellAlignment, Table};
use faultbench_trace::{IntrospectionSnapshot, WorkloadStats};
use serde::Serialize;
use std::time::Duration;

const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

/// Result of one policy in a comparison.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyResult {
    pub policy: PolicyKind,
    pub summary: RunSummary,
    pub snapshot: IntrospectionSnapshot,
    pub workload: WorkloadStats,
}

/// Run the same workload under every policy at once, each in its own harness.
pub fn run(config: HarnessConfig, json: bool) -> Result<()> {
    let interrupted = super::install_interrupt_handler()?;
    let results = compare(&config, |harnesses| {
        wait_for(harnesses, &interrupted, MONITOR_INTERVAL, || {
            for h in harnesses {
                let snap = h.report();
                tracing::info!(
                    policy = ?h.policy(),
                    active = snap.active_handles,
                    acquired = snap.cumulative_acquired,
                    "progress"
                );
            }
        })
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_table(&results);
    }

    for result in &results {
        check_outcome(&result.summary, config.handle_ceiling)?;
    }
    Ok(())
}

/// Start one harness per policy, wait with `wait`, then stop them all.
/// `wait` returns true when the runs should be cancelled.
pub fn compare(
    config: &HarnessConfig,
    wait: impl FnOnce(&[&Harness]) -> bool,
) -> Result<Vec<PolicyResult>> {
    let harnesses: Vec<(PolicyKind, Harness)> = PolicyKind::ALL
        .iter()
        .map(|&kind| (kind, Harness::new()))
        .collect();
    for (kind, harness) in &harnesses {
        harness.start(*kind, config.clone())?;
    }

    let refs: Vec<&Harness> = harnesses.iter().map(|(_, h)| h).collect();
    let cancel = wait(&refs);

    let mut results = Vec::with_capacity(harnesses.len());
    for (kind, harness) in &harnesses {
        let summary = stop(harness, cancel)?;
        results.push(PolicyResult {
            policy: *kind,
            summary,
            snapshot: harness.report(),
            workload: harness.registry().workload_stats(),
        });
    }
    Ok(results)
}

fn print_table(results: &[PolicyResult]) {
    let mut table = Table::new();
    let mut header = vec!["METRIC".to_string()];
    header.extend(results.iter().map(|r| r.policy.to_string().to_uppercase()));
    table.set_header(header);

    type Row = (&'static str, fn(&PolicyResult) -> String);
    let rows: [Row; 10] = [
        ("outcome", |r| outcome_label(r.summary.outcome).to_string()),
        ("operations", |r| r.summary.operations.to_string()),
        ("failed", |r| r.summary.failed_operations.to_string()),
        ("active handles", |r| r.snapshot.active_handles.to_string()),
        ("cumulative acquired", |r| r.snapshot.cumulative_acquired.to_string()),
        ("cumulative released", |r| r.snapshot.cumulative_released.to_string()),
        ("peak active handles", |r| r.workload.peak_active_handles.to_string()),
        ("allocations", |r| r.workload.allocations.to_string()),
        ("bytes copied", |r| format_bytes(r.workload.bytes_copied)),
        ("latency p99", |r| format_nanos(r.workload.latency_nanos.quantile(0.99))),
    ];
    for (name, value) in rows {
        let mut row = vec![name.to_string()];
        row.extend(results.iter().map(value));
        table.add_row(row);
    }
    for index in 1..=results.len() {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    println!("{table}");
}
