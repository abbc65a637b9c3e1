use crate::config::{HarnessConfig, ScenarioConfig};
use crate::policy::PolicyKind;
use crate::scenario::ScenarioKind;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "faultbench")]
#[command(about = "Reproduce resource leaks under controlled load and watch them grow")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a workload under one policy and report the handle counters
    Run {
        /// Resource-handling policy
        #[arg(long, short = 'p', value_enum, default_value = "leaking")]
        policy: PolicyKind,

        #[command(flatten)]
        workload: WorkloadArgs,

        /// Log a snapshot this often while the run is active
        #[arg(long, short = 'i', default_value = "2s", value_parser = parse_duration)]
        interval: Duration,

        /// Serve the JSON report over TCP while the run is active
        #[arg(long)]
        export_addr: Option<SocketAddr>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the same workload under both policies and compare the counters
    Compare {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Measure naive vs amortized string growth
    Cost {
        /// Number of items appended
        #[arg(long, short = 'n', default_value = "10000")]
        n: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

/// Workload parameters shared by `run` and `compare`.
#[derive(Args, Debug, Clone)]
pub struct WorkloadArgs {
    /// Rate ceiling in operations per second (0 = unthrottled)
    #[arg(long, short = 'r', default_value = "1000")]
    pub ops_per_second: u64,

    /// Total operations to issue
    #[arg(long, short = 't', default_value = "500")]
    pub total_ops: u64,

    /// Maximum operations in flight
    #[arg(long, short = 'c', default_value = "1")]
    pub concurrency: usize,

    /// Synthetic unit of work
    #[arg(long, short = 's', value_enum, default_value = "connection")]
    pub scenario: ScenarioKind,

    /// Items appended per operation (string-build)
    #[arg(long, default_value = "1000")]
    pub items: usize,

    /// Request size per operation (connection)
    #[arg(long, default_value = "1KiB", value_parser = parse_size)]
    pub request_size: u64,

    /// Body size per operation (stream-body)
    #[arg(long, default_value = "1MiB", value_parser = parse_size)]
    pub payload_size: u64,

    /// Fail with exhaustion once this many handles are active
    #[arg(long)]
    pub ceiling: Option<u64>,

    /// Inject a transient failure into every k-th operation
    #[arg(long)]
    pub fail_every: Option<u64>,

    /// How long stopping waits for pending operations before cancelling
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub drain_timeout: Duration,
}

impl WorkloadArgs {
    pub fn to_config(&self) -> Result<HarnessConfig, String> {
        let request_bytes = usize::try_from(self.request_size)
            .map_err(|_| format!("request size {} does not fit in memory", self.request_size))?;
        Ok(HarnessConfig {
            ops_per_second: self.ops_per_second,
            total_ops: self.total_ops,
            concurrency: self.concurrency,
            scenario: ScenarioConfig {
                kind: self.scenario,
                n: self.items,
                request_bytes,
                payload_bytes: self.payload_size,
            },
            handle_ceiling: self.ceiling,
            fail_every: self.fail_every,
            drain_timeout: self.drain_timeout,
        })
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 500ms, 2s, 1m, 90",
        s
    ))
}

fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("Invalid size '{}'. Examples: 512, 64KiB, 10MiB", s))?;
    let scale = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KiB" => 1024,
        "M" | "MB" | "MiB" => 1024 * 1024,
        other => return Err(format!("Unknown size unit '{}'. Use B, KiB or MiB", other)),
    };
    value
        .checked_mul(scale)
        .ok_or_else(|| format!("Size '{}' is too large", s))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Run { workload, interval, .. } => {
                if interval.is_zero() {
                    return Err("Monitor interval must be greater than zero".to_string());
                }
                workload.validate()
            }
            Command::Compare { workload, .. } => workload.validate(),
            Command::Cost { n, .. } => {
                if *n == 0 {
                    return Err("Item count must be at least 1".to_string());
                }
                Ok(())
            }
            Command::Completions { .. } => Ok(()),
        }
    }
}

impl WorkloadArgs {
    fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("Concurrency must be at least 1".to_string());
        }
        if self.total_ops == 0 {
            return Err("Total operations must be at least 1".to_string());
        }
        if self.fail_every == Some(0) {
            return Err("--fail-every must be at least 1".to_string());
        }
        Ok(())
    }
}
