pub mod cli;
pub mod commands;
pub mod config;
pub mod costmodel;
pub mod error;
pub mod export;
pub mod harness;
pub mod policy;
pub mod process;
pub mod resource;
pub mod scenario;
pub mod workload;

pub use config::{HarnessConfig, ScenarioConfig};
pub use error::{Error, Result};
pub use harness::{Harness, RunSummary};
pub use policy::{Policy, PolicyKind};
