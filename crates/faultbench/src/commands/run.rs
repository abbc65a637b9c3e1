use super::{check_outcome, format_bytes, format_nanos, outcome_label, stop, wait_for};
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::export::{ExportReport, ExportServer};
use crate::harness::Harness;
use crate::policy::PolicyKind;
use comfy_table::{CellAlignment, Table};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub fn run(
    policy: PolicyKind,
    config: HarnessConfig,
    interval: Duration,
    export_addr: Option<SocketAddr>,
    json: bool,
) -> Result<()> {
    let interrupted = super::install_interrupt_handler()?;
    let harness = Arc::new(Harness::new());
    let ceiling = config.handle_ceiling;

    harness.start(policy, config)?;
    let server = match export_addr {
        Some(addr) => Some(ExportServer::bind(addr, Arc::clone(&harness))?),
        None => None,
    };

    let was_interrupted = wait_for(&[harness.as_ref()], &interrupted, interval, || {
        let snap = harness.report();
        let stats = harness.registry().workload_stats();
        tracing::info!(
            %policy,
            active = snap.active_handles,
            acquired = snap.cumulative_acquired,
            released = snap.cumulative_released,
            operations = stats.operations,
            "progress"
        );
    });
    if was_interrupted {
        tracing::info!("interrupted, stopping run");
    }

    let summary = stop(&harness, was_interrupted)?;
    if let Some(server) = server {
        server.shutdown();
    }

    let report = ExportReport::capture(&harness);
    if json {
        println!("{}", report.to_json_pretty()?);
    } else {
        print_report(&report);
    }

    check_outcome(&summary, ceiling)
}

fn print_report(report: &ExportReport) {
    let snap = &report.snapshot;
    let stats = &report.workload;

    if let Some(policy) = report.policy {
        println!("# Policy: {}", policy);
    }
    if let Some(summary) = &report.last_run {
        println!(
            "# Outcome: {} | Operations: {} ({} failed) | Elapsed: {}ms{}",
            outcome_label(summary.outcome),
            summary.operations,
            summary.failed_operations,
            summary.elapsed_ms,
            if summary.forced { " | drain timed out" } else { "" }
        );
    }
    if snap.partial {
        println!("# Partial: the run did not complete");
    }
    println!();

    let mut table = Table::new();
    table.set_header(vec!["METRIC", "VALUE"]);
    let rows: Vec<(&str, String)> = vec![
        ("active handles", snap.active_handles.to_string()),
        ("cumulative acquired", snap.cumulative_acquired.to_string()),
        ("cumulative released", snap.cumulative_released.to_string()),
        ("peak active handles", stats.peak_active_handles.to_string()),
        ("bytes moved", format_bytes(stats.bytes_moved)),
        ("allocations", stats.allocations.to_string()),
        ("bytes copied", format_bytes(stats.bytes_copied)),
        ("latency mean", format_nanos(stats.latency_nanos.mean() as u64)),
        ("latency p50", format_nanos(stats.latency_nanos.quantile(0.5))),
        ("latency p99", format_nanos(stats.latency_nanos.quantile(0.99))),
    ];
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }

    let env = &report.environment;
    let optional = [
        ("open fds", env.open_fds.map(|v| v.to_string())),
        ("threads", env.threads.map(|v| v.to_string())),
        ("rss", env.rss_bytes.map(format_bytes)),
        ("heap live", env.heap_live_bytes.map(format_bytes)),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            table.add_row(vec![name.to_string(), value]);
        }
    }

    if let Some(column) = table.column_mut(1) {
        column.set_cell_alignment(CellAlignment::Right);
    }
    println!("{table}");
}
