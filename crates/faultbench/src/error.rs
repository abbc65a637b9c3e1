use faultbench_trace::RegistryError;
use serde::Serialize;
use thiserror::Error;

use crate::resource::{HandleId, OwnerId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Resource ceiling reached: {ceiling} handles active")]
    Exhausted { ceiling: u64 },

    #[error("Ownership violation: handle {handle} belongs to policy {owner}, released through policy {caller}")]
    OwnershipViolation {
        handle: HandleId,
        owner: OwnerId,
        caller: OwnerId,
    },

    #[error("Harness already running. Call stop() before starting again")]
    AlreadyRunning,

    #[error("Harness not running")]
    NotRunning,

    #[error("Payload of {size} bytes exceeds the {max} byte ceiling")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("Counter underflow: {acquired} acquired, {released} released")]
    CounterUnderflow { acquired: u64, released: u64 },

    #[error("Run aborted: {0}")]
    Aborted(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CeilingReached { ceiling } => Error::Exhausted { ceiling },
            RegistryError::Underflow { acquired, released } => {
                Error::CounterUnderflow { acquired, released }
            }
        }
    }
}

/// Failure recorded in an `OperationResult`. Never propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpErrorKind {
    /// Injected fault in the unit of work; the run continues.
    Transient,
    /// The resource ceiling was hit; this is the last result of its run.
    Exhausted,
}

impl std::fmt::Display for OpErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpErrorKind::Transient => f.write_str("transient"),
            OpErrorKind::Exhausted => f.write_str("exhausted"),
        }
    }
}

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGUMENTS: i32 = 2;
    pub const EXHAUSTED: i32 = 3;
    pub const INVARIANT_VIOLATION: i32 = 4;
    pub const CONTROL_MISUSE: i32 = 5;
}

impl Error {
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Exhausted { .. } => exit_code::EXHAUSTED,
            Error::OwnershipViolation { .. }
            | Error::CounterUnderflow { .. }
            | Error::Aborted(_) => exit_code::INVARIANT_VIOLATION,
            Error::AlreadyRunning | Error::NotRunning => exit_code::CONTROL_MISUSE,
            Error::PayloadTooLarge { .. } | Error::InvalidArgument(_) => {
                exit_code::INVALID_ARGUMENTS
            }
            _ => exit_code::GENERAL_ERROR,
        }
    }
}
