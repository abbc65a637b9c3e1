use anyhow::Context;
use clap::Parser;
use faultbench::cli::{Cli, Command};
use faultbench::error::exit_code;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

faultbench_trace::counting_allocator!();

fn main() -> ExitCode {
    init_logging();
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(err) = e.downcast_ref::<faultbench::Error>() {
                ExitCode::from(err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("FAULTBENCH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(msg) = cli.validate() {
        return Err(faultbench::Error::InvalidArgument(msg)).context("Invalid arguments");
    }

    match cli.command {
        Command::Run {
            policy,
            workload,
            interval,
            export_addr,
            json,
        } => {
            let config = workload
                .to_config()
                .map_err(faultbench::Error::InvalidArgument)?;
            faultbench::commands::run::run(policy, config, interval, export_addr, json)
                .with_context(|| format!("{} run failed", policy))?;
        }
        Command::Compare { workload, json } => {
            let config = workload
                .to_config()
                .map_err(faultbench::Error::InvalidArgument)?;
            faultbench::commands::compare::run(config, json).context("Comparison failed")?;
        }
        Command::Cost { n, json } => {
            faultbench::commands::cost::run(n, json)?;
        }
        Command::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "faultbench", &mut std::io::stdout());
        }
    }

    Ok(())
}
