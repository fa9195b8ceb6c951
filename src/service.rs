//! Service shell and wire codec
//!
//! [`AllocatorService`] validates requests and delegates to the allocator;
//! it holds no state of its own. The wire codec frames the three operations
//! for the TCP adapter: requests are an opcode byte followed by two
//! little-endian `u64` operands, responses a status byte followed by one
//! little-endian `u64` payload.

use std::sync::Arc;

use crate::allocator::SpaceAllocator;
use crate::error::{Result, SpaceWeaveError};

pub const REQUEST_LEN: usize = 17;
pub const RESPONSE_LEN: usize = 9;

pub const OP_ALLOCATE: u8 = 1;
pub const OP_FREE: u8 = 2;
pub const OP_UTILIZATION: u8 = 3;

pub const STATUS_OK: u8 = 0;
pub const STATUS_INVALID_ARGUMENT: u8 = 1;
pub const STATUS_NO_SPACE: u8 = 2;
pub const STATUS_INTERNAL: u8 = 3;

/// A decoded request frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Allocate { size: u64 },
    Free { address: u64, size: u64 },
    Utilization,
}

/// Decode a request frame. Unknown opcodes are protocol errors and should
/// close the connection.
pub fn decode_request(frame: &[u8; REQUEST_LEN]) -> Result<Request> {
    let mut first = [0u8; 8];
    first.copy_from_slice(&frame[1..9]);
    let mut second = [0u8; 8];
    second.copy_from_slice(&frame[9..17]);
    let a = u64::from_le_bytes(first);
    let b = u64::from_le_bytes(second);

    match frame[0] {
        OP_ALLOCATE => Ok(Request::Allocate { size: a }),
        OP_FREE => Ok(Request::Free { address: a, size: b }),
        OP_UTILIZATION => Ok(Request::Utilization),
        op => Err(SpaceWeaveError::Protocol(format!("unknown opcode {op}"))),
    }
}

/// Encode a request frame; the inverse of [`decode_request`].
pub fn encode_request(request: Request) -> [u8; REQUEST_LEN] {
    let (op, a, b) = match request {
        Request::Allocate { size } => (OP_ALLOCATE, size, 0),
        Request::Free { address, size } => (OP_FREE, address, size),
        Request::Utilization => (OP_UTILIZATION, 0, 0),
    };
    let mut frame = [0u8; REQUEST_LEN];
    frame[0] = op;
    frame[1..9].copy_from_slice(&a.to_le_bytes());
    frame[9..17].copy_from_slice(&b.to_le_bytes());
    frame
}

pub fn encode_response(status: u8, payload: u64) -> [u8; RESPONSE_LEN] {
    let mut frame = [0u8; RESPONSE_LEN];
    frame[0] = status;
    frame[1..9].copy_from_slice(&payload.to_le_bytes());
    frame
}

pub fn decode_response(frame: &[u8; RESPONSE_LEN]) -> (u8, u64) {
    let mut payload = [0u8; 8];
    payload.copy_from_slice(&frame[1..9]);
    (frame[0], u64::from_le_bytes(payload))
}

fn status_for(err: &SpaceWeaveError) -> u8 {
    match err {
        SpaceWeaveError::InvalidArgument(_) => STATUS_INVALID_ARGUMENT,
        SpaceWeaveError::OutOfSpace => STATUS_NO_SPACE,
        _ => STATUS_INTERNAL,
    }
}

/// Stateless shell in front of the allocator.
#[derive(Clone)]
pub struct AllocatorService {
    allocator: Arc<dyn SpaceAllocator>,
}

impl AllocatorService {
    pub fn new(allocator: Arc<dyn SpaceAllocator>) -> Self {
        AllocatorService { allocator }
    }

    /// Allocate `size` bytes. `size` must be positive.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(SpaceWeaveError::InvalidArgument(
                "size must be positive".to_string(),
            ));
        }
        self.allocator.allocate(size)
    }

    pub fn free(&self, address: u64, size: u64) -> Result<()> {
        self.allocator.free(address, size)
    }

    pub fn utilization(&self) -> f32 {
        self.allocator.utilization() as f32
    }

    /// Execute a decoded request and encode its response frame.
    ///
    /// Allocation failures map to statuses rather than closing the
    /// connection; the utilization payload carries the `f32` bit pattern.
    pub fn handle(&self, request: Request) -> [u8; RESPONSE_LEN] {
        match request {
            Request::Allocate { size } => match self.allocate(size) {
                Ok(address) => encode_response(STATUS_OK, address),
                Err(err) => encode_response(status_for(&err), 0),
            },
            Request::Free { address, size } => match self.free(address, size) {
                Ok(()) => encode_response(STATUS_OK, 0),
                Err(err) => encode_response(status_for(&err), 0),
            },
            Request::Utilization => {
                encode_response(STATUS_OK, u64::from(self.utilization().to_bits()))
            }
        }
    }
}
