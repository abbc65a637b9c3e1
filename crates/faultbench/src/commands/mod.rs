pub mod compare;
pub mod cost;
pub mod run;

use crate::error::{Error, Result};
use crate::harness::{Harness, RunSummary};
use crate::workload::RunOutcome;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(20);

/// Set a flag on Ctrl-C. Only one handler can exist per process.
fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(std::io::Error::other)?;
    Ok(interrupted)
}

/// Block until every harness has finished its run or the user interrupts.
/// `on_tick` is called every `interval`. Returns true if interrupted.
fn wait_for(
    harnesses: &[&Harness],
    interrupted: &AtomicBool,
    interval: Duration,
    mut on_tick: impl FnMut(),
) -> bool {
    let mut next_tick = Instant::now() + interval;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            return true;
        }
        if harnesses.iter().all(|h| h.is_finished()) {
            return false;
        }
        if Instant::now() >= next_tick {
            on_tick();
            next_tick += interval;
        }
        std::thread::sleep(POLL);
    }
}

/// Stop a harness, cancelling immediately after an interrupt.
fn stop(harness: &Harness, interrupted: bool) -> Result<RunSummary> {
    if interrupted {
        harness.stop_within(Duration::ZERO)
    } else {
        harness.stop()
    }
}

/// Turn a run that ended on a defect into an error for the exit code.
fn check_outcome(summary: &RunSummary, ceiling: Option<u64>) -> Result<()> {
    match summary.outcome {
        RunOutcome::Exhausted => Err(Error::Exhausted {
            ceiling: ceiling.unwrap_or_default(),
        }),
        RunOutcome::Aborted => Err(Error::Aborted(
            summary
                .fault
                .clone()
                .unwrap_or_else(|| "worker failure".to_string()),
        )),
        RunOutcome::Completed | RunOutcome::Cancelled => Ok(()),
    }
}

fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= 1_073_741_824.0 {
        format!("{:.1}GiB", b / 1_073_741_824.0)
    } else if b >= 1_048_576.0 {
        format!("{:.1}MiB", b / 1_048_576.0)
    } else if b >= 1024.0 {
        format!("{:.1}KiB", b / 1024.0)
    } else {
        format!("{}B", bytes)
    }
}

fn format_nanos(nanos: u64) -> String {
    humantime::format_duration(Duration::from_nanos(nanos)).to_string()
}

fn outcome_label(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::Exhausted => "exhausted",
        RunOutcome::Cancelled => "cancelled",
        RunOutcome::Aborted => "aborted",
    }
}
