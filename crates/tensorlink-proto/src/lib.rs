//! Wire protocol for the tensorlink command exchange.
//!
//! The host and the accelerator communicate through two fixed 512-byte
//! frames in device memory: a command frame DMA'd to the exchange address
//! and a response frame DMA'd back after the device raises its completion
//! interrupt. This crate owns those layouts plus the two bulk payload
//! formats that ride along with them (the serialized tensor record and the
//! graph-compute payload). Field order and sizes are the contract between
//! host and device firmware and must not change independently on either
//! side; everything is packed little-endian.
//!
//! No I/O happens here. Encoding produces fixed buffers for the transport
//! layer to move; decoding exists for the host's response path and for
//! exercising both directions in tests.

use core::fmt;

use thiserror::Error;

mod cmd;
mod graph;
mod tensor;

pub use cmd::{
    decode_command, decode_response, encode_command, encode_response, CmdKind, CmdRequest,
    CmdResponse, ResultLocation, CMD_ARGS_OFFSET, CMD_BUFFER_SIZE, CMD_KIND_OFFSET,
};
pub use graph::{decode_graph, encode_graph, GraphDesc, GRAPH_HEADER_SIZE};
pub use tensor::{TensorFlags, TensorRecord, MAX_DIMS, MAX_NAME, MAX_SRC, OP_PARAM_WORDS};

/// Decode-side protocol failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("buffer too short: need {need} bytes, got {got}")]
    ShortBuffer { need: usize, got: usize },

    #[error("unknown command kind tag {0}")]
    UnknownCommand(u32),

    #[error("graph payload counts are negative or oversized")]
    BadGraphHeader,
}

pub const CORRELATION_ID_SIZE: usize = 16;

/// Random token placed in a command frame and echoed in its response.
///
/// Only one command is ever in flight, so this is a sanity token for logs
/// and mismatch detection, not a demultiplexing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId([u8; CORRELATION_ID_SIZE]);

impl CorrelationId {
    /// Generates a fresh 128-bit random token.
    pub fn generate() -> Self {
        CorrelationId(rand::random())
    }

    pub const fn from_bytes(bytes: [u8; CORRELATION_ID_SIZE]) -> Self {
        CorrelationId(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; CORRELATION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Opaque identity of a device-resident buffer.
///
/// Issued monotonically by the host; the device uses it purely as a
/// correlation token into its own id map. Never a real address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Opaque identity of a tensor, with the same contract as [`BufferHandle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorHandle(pub u64);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf:{:#x}", self.0)
    }
}

impl fmt::Display for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tsr:{:#x}", self.0)
    }
}
