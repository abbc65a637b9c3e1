//! Synthetic units of work performed while a handle is held.

use crate::costmodel::{CostMeter, Growth, build_items};
use crate::error::{Error, OpErrorKind, Result};
use crate::resource::ResourceHandle;
use serde::Serialize;
use std::io::{self, Read};

/// Per-connection buffer allocated when a connection is dialed.
pub const CONNECTION_BUFFER_SIZE: usize = 16 * 1024;

/// Chunk used to drain a streamed body.
pub const STREAM_CHUNK_SIZE: usize = 32 * 1024;

/// Hard ceiling on a request or a streamed request body.
pub const MAX_PAYLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Ceiling on the item count of the string scenario.
pub const MAX_STRING_ITEMS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Dial a connection and send one request through it
    Connection,
    /// Build an n-item string
    StringBuild,
    /// Consume a streamed request body
    StreamBody,
}

/// Outcome of one successful unit of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Work {
    pub bytes_moved: u64,
    pub cost: CostMeter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    kind: ScenarioKind,
    n: usize,
    request_bytes: usize,
    payload_bytes: u64,
}

impl Scenario {
    pub fn connection(request_bytes: usize) -> Self {
        Self {
            kind: ScenarioKind::Connection,
            n: 0,
            request_bytes,
            payload_bytes: 0,
        }
    }

    pub fn string_build(n: usize) -> Self {
        Self {
            kind: ScenarioKind::StringBuild,
            n,
            request_bytes: 0,
            payload_bytes: 0,
        }
    }

    /// A streamed body of `payload_bytes`, which must be in
    /// `1..=MAX_PAYLOAD_BYTES`.
    pub fn stream_body(payload_bytes: u64) -> Result<Self> {
        if payload_bytes > MAX_PAYLOAD_BYTES {
            return Err(Error::PayloadTooLarge {
                size: payload_bytes,
                max: MAX_PAYLOAD_BYTES,
            });
        }
        if payload_bytes == 0 {
            return Err(Error::InvalidArgument(
                "stream payload must be at least 1 byte".to_string(),
            ));
        }
        Ok(Self {
            kind: ScenarioKind::StreamBody,
            n: 0,
            request_bytes: 0,
            payload_bytes,
        })
    }

    pub fn kind(&self) -> ScenarioKind {
        self.kind
    }

    /// Bytes each handle allocates when it is acquired.
    pub fn handle_capacity(&self) -> usize {
        match self.kind {
            ScenarioKind::Connection => CONNECTION_BUFFER_SIZE,
            ScenarioKind::StringBuild => 0,
            ScenarioKind::StreamBody => STREAM_CHUNK_SIZE,
        }
    }

    /// Run one unit of work against `handle`.
    pub fn perform(
        &self,
        handle: &mut ResourceHandle,
        growth: Growth,
    ) -> std::result::Result<Work, OpErrorKind> {
        match self.kind {
            ScenarioKind::Connection => Ok(send_request(handle, self.request_bytes)),
            ScenarioKind::StringBuild => Ok(build_string(handle, self.n, growth)),
            ScenarioKind::StreamBody => {
                let body = SyntheticBody::new(self.payload_bytes);
                let result = match growth {
                    Growth::Naive => retain_body(handle, body),
                    Growth::Amortized => drain_body(handle, body),
                };
                result.map_err(|e| {
                    tracing::debug!(error = %e, "stream body read failed");
                    OpErrorKind::Transient
                })
            }
        }
    }
}

/// Push a request through the connection buffer one buffer-length at a time.
/// The request is generated as it is sent and never held in full.
fn send_request(handle: &mut ResourceHandle, request_bytes: usize) -> Work {
    let buffer = handle.buffer_mut();
    if buffer.is_empty() {
        buffer.resize(CONNECTION_BUFFER_SIZE, 0);
    }
    let mut remaining = request_bytes;
    while remaining > 0 {
        let n = remaining.min(buffer.len());
        buffer[..n].fill(b'r');
        remaining -= n;
    }
    Work {
        bytes_moved: request_bytes as u64,
        cost: CostMeter {
            allocations: 0,
            bytes_copied: request_bytes as u64,
        },
    }
}

/// Build the item string and keep it in the handle, so a leaked handle
/// keeps the string alive.
fn build_string(handle: &mut ResourceHandle, n: usize, growth: Growth) -> Work {
    let buf = build_items(n, growth);
    let cost = buf.meter();
    let bytes = buf.into_string().into_bytes();
    let bytes_moved = bytes.len() as u64;
    *handle.buffer_mut() = bytes;
    Work { bytes_moved, cost }
}

/// Read the whole body into the handle buffer and hold on to it.
fn retain_body(handle: &mut ResourceHandle, mut body: SyntheticBody) -> io::Result<Work> {
    let buffer = handle.buffer_mut();
    buffer.clear();
    let mut cost = CostMeter::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = body.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let capacity = buffer.capacity();
        if capacity - buffer.len() < n {
            // Vec growth copies the retained prefix.
            cost.allocations += 1;
            cost.bytes_copied += buffer.len() as u64;
        }
        buffer.extend_from_slice(&chunk[..n]);
        cost.bytes_copied += n as u64;
    }
    Ok(Work {
        bytes_moved: buffer.len() as u64,
        cost,
    })
}

/// Stream the body through the fixed handle chunk and discard it.
fn drain_body(handle: &mut ResourceHandle, mut body: SyntheticBody) -> io::Result<Work> {
    let buffer = handle.buffer_mut();
    if buffer.len() < STREAM_CHUNK_SIZE {
        buffer.resize(STREAM_CHUNK_SIZE, 0);
    }
    let mut moved = 0u64;
    loop {
        let n = body.read(buffer)?;
        if n == 0 {
            break;
        }
        moved += n as u64;
    }
    Ok(Work {
        bytes_moved: moved,
        cost: CostMeter {
            allocations: 0,
            bytes_copied: moved,
        },
    })
}

/// Deterministic request body of a fixed length.
#[derive(Debug)]
pub struct SyntheticBody {
    remaining: u64,
    offset: u64,
}

impl SyntheticBody {
    pub fn new(len: u64) -> Self {
        Self {
            remaining: len,
            offset: 0,
        }
    }
}

impl Read for SyntheticBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining) as usize;
        for (i, byte) in buf[..n].iter_mut().enumerate() {
            *byte = ((self.offset + i as u64) % 251) as u8;
        }
        self.remaining -= n as u64;
        self.offset += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{HandleId, OwnerId};

    fn handle(capacity: usize) -> ResourceHandle {
        ResourceHandle::new(HandleId::new(OwnerId::next(), 0), capacity)
    }

    #[test]
    fn test_payload_ceiling() {
        assert!(Scenario::stream_body(MAX_PAYLOAD_BYTES).is_ok());
        assert!(matches!(
            Scenario::stream_body(MAX_PAYLOAD_BYTES + 1),
            Err(Error::PayloadTooLarge { size, max }) if size == MAX_PAYLOAD_BYTES + 1 && max == MAX_PAYLOAD_BYTES
        ));
        assert!(matches!(
            Scenario::stream_body(0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_synthetic_body_length() {
        let mut body = SyntheticBody::new(100_000);
        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 100_000);
        assert_eq!(out[251], 0);
        assert_eq!(out[252], 1);
    }

    #[test]
    fn test_connection_moves_request_bytes() {
        let scenario = Scenario::connection(40_000);
        let mut h = handle(scenario.handle_capacity());
        let work = scenario.perform(&mut h, Growth::Amortized).unwrap();
        assert_eq!(work.bytes_moved, 40_000);
        assert_eq!(work.cost.allocations, 0);
        assert_eq!(h.buffer().len(), CONNECTION_BUFFER_SIZE);
        assert!(h.buffer().iter().all(|&b| b == b'r'));
    }

    #[test]
    fn test_string_build_keeps_output_in_handle() {
        let scenario = Scenario::string_build(100);
        let mut h = handle(scenario.handle_capacity());
        let naive = scenario.perform(&mut h, Growth::Naive).unwrap();
        assert_eq!(h.buffer().len() as u64, naive.bytes_moved);
        assert_eq!(naive.cost.allocations, 100);

        let mut h = handle(0);
        let amortized = scenario.perform(&mut h, Growth::Amortized).unwrap();
        assert_eq!(amortized.bytes_moved, naive.bytes_moved);
        assert!(amortized.cost.bytes_copied < naive.cost.bytes_copied);
    }

    #[test]
    fn test_stream_body_retain_vs_drain() {
        let scenario = Scenario::stream_body(1024 * 1024).unwrap();

        let mut retained = handle(scenario.handle_capacity());
        let work = scenario.perform(&mut retained, Growth::Naive).unwrap();
        assert_eq!(work.bytes_moved, 1024 * 1024);
        assert_eq!(retained.buffer().len(), 1024 * 1024);
        assert!(work.cost.allocations > 0);

        let mut drained = handle(scenario.handle_capacity());
        let work = scenario.perform(&mut drained, Growth::Amortized).unwrap();
        assert_eq!(work.bytes_moved, 1024 * 1024);
        assert_eq!(drained.buffer().len(), STREAM_CHUNK_SIZE);
        assert_eq!(work.cost.allocations, 0);
    }
}
