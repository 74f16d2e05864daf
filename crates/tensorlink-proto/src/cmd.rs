//! Command and response frame layouts.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! command:  correlation id (16) | kind u32 @16 (slot padded to 8) |
//!           u64 argument slots from @24, per-kind order
//! response: correlation id (16) | status i32 @16 (slot padded to 8) |
//!           result device-address u64 @24 | result size u64 @32
//! ```
//!
//! The trailing response pair is only meaningful when the caller expected
//! output; the device leaves it zeroed otherwise.

use crate::{BufferHandle, CorrelationId, ProtoError, TensorHandle, CORRELATION_ID_SIZE};

/// Fixed size of both exchange frames.
pub const CMD_BUFFER_SIZE: usize = 512;

/// Byte offset of the command-kind / status word.
pub const CMD_KIND_OFFSET: usize = CORRELATION_ID_SIZE;

/// Byte offset of the first argument slot (the kind word's slot is padded
/// out to 8 bytes).
pub const CMD_ARGS_OFFSET: usize = CMD_KIND_OFFSET + 8;

/// Command kind tags. Wire values are fixed by the device firmware.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdKind {
    AllocBuffer = 1,
    GetAlignment = 2,
    GetMaxSize = 3,
    BufferGetBase = 4,
    FreeBuffer = 5,
    BufferClear = 6,
    InitTensor = 7,
    SetTensor = 8,
    GetTensor = 9,
    MemsetTensor = 10,
    CopyTensor = 11,
    GraphCompute = 12,
    GetDeviceMemory = 13,
}

impl CmdKind {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::AllocBuffer),
            2 => Some(Self::GetAlignment),
            3 => Some(Self::GetMaxSize),
            4 => Some(Self::BufferGetBase),
            5 => Some(Self::FreeBuffer),
            6 => Some(Self::BufferClear),
            7 => Some(Self::InitTensor),
            8 => Some(Self::SetTensor),
            9 => Some(Self::GetTensor),
            10 => Some(Self::MemsetTensor),
            11 => Some(Self::CopyTensor),
            12 => Some(Self::GraphCompute),
            13 => Some(Self::GetDeviceMemory),
            _ => None,
        }
    }
}

/// One command request, one variant per kind, each carrying its typed
/// argument fields in wire order.
///
/// `InitTensor` and `GraphCompute` reference payloads the host has already
/// staged into device memory; their argument pair is the staging location,
/// never a host pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdRequest {
    AllocBuffer {
        buffer: BufferHandle,
        device_ptr: u64,
        size: u64,
    },
    GetAlignment,
    GetMaxSize,
    BufferGetBase,
    FreeBuffer {
        buffer: BufferHandle,
        device_ptr: u64,
        size: u64,
    },
    BufferClear {
        device_ptr: u64,
        size: u64,
        value: u64,
    },
    InitTensor {
        device_ptr: u64,
        size: u64,
    },
    SetTensor {
        buffer: BufferHandle,
        tensor: TensorHandle,
        device_ptr: u64,
        size: u64,
    },
    GetTensor,
    MemsetTensor {
        buffer: BufferHandle,
        tensor: TensorHandle,
        value: u64,
        offset: u64,
        size: u64,
    },
    CopyTensor {
        buffer: BufferHandle,
        src: TensorHandle,
        dst: TensorHandle,
    },
    GraphCompute {
        device_ptr: u64,
        size: u64,
    },
    GetDeviceMemory,
}

impl CmdRequest {
    pub const fn kind(&self) -> CmdKind {
        match self {
            CmdRequest::AllocBuffer { .. } => CmdKind::AllocBuffer,
            CmdRequest::GetAlignment => CmdKind::GetAlignment,
            CmdRequest::GetMaxSize => CmdKind::GetMaxSize,
            CmdRequest::BufferGetBase => CmdKind::BufferGetBase,
            CmdRequest::FreeBuffer { .. } => CmdKind::FreeBuffer,
            CmdRequest::BufferClear { .. } => CmdKind::BufferClear,
            CmdRequest::InitTensor { .. } => CmdKind::InitTensor,
            CmdRequest::SetTensor { .. } => CmdKind::SetTensor,
            CmdRequest::GetTensor => CmdKind::GetTensor,
            CmdRequest::MemsetTensor { .. } => CmdKind::MemsetTensor,
            CmdRequest::CopyTensor { .. } => CmdKind::CopyTensor,
            CmdRequest::GraphCompute { .. } => CmdKind::GraphCompute,
            CmdRequest::GetDeviceMemory => CmdKind::GetDeviceMemory,
        }
    }
}

struct SlotWriter<'a> {
    buf: &'a mut [u8],
    at: usize,
}

impl SlotWriter<'_> {
    fn push(&mut self, v: u64) {
        self.buf[self.at..self.at + 8].copy_from_slice(&v.to_le_bytes());
        self.at += 8;
    }
}

struct SlotReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl SlotReader<'_> {
    fn pull(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.at..self.at + 8].try_into().unwrap());
        self.at += 8;
        v
    }
}

/// Encodes one command into a fresh exchange frame.
pub fn encode_command(id: &CorrelationId, req: &CmdRequest) -> [u8; CMD_BUFFER_SIZE] {
    let mut buf = [0u8; CMD_BUFFER_SIZE];
    buf[..CORRELATION_ID_SIZE].copy_from_slice(id.as_bytes());
    buf[CMD_KIND_OFFSET..CMD_KIND_OFFSET + 4].copy_from_slice(&(req.kind() as u32).to_le_bytes());

    let mut w = SlotWriter { buf: &mut buf, at: CMD_ARGS_OFFSET };
    match *req {
        CmdRequest::AllocBuffer { buffer, device_ptr, size }
        | CmdRequest::FreeBuffer { buffer, device_ptr, size } => {
            w.push(buffer.0);
            w.push(device_ptr);
            w.push(size);
        }
        CmdRequest::BufferClear { device_ptr, size, value } => {
            w.push(device_ptr);
            w.push(size);
            w.push(value);
        }
        CmdRequest::InitTensor { device_ptr, size }
        | CmdRequest::GraphCompute { device_ptr, size } => {
            w.push(device_ptr);
            w.push(size);
        }
        CmdRequest::SetTensor { buffer, tensor, device_ptr, size } => {
            w.push(buffer.0);
            w.push(tensor.0);
            w.push(device_ptr);
            w.push(size);
        }
        CmdRequest::MemsetTensor { buffer, tensor, value, offset, size } => {
            w.push(buffer.0);
            w.push(tensor.0);
            w.push(value);
            w.push(offset);
            w.push(size);
        }
        CmdRequest::CopyTensor { buffer, src, dst } => {
            w.push(buffer.0);
            w.push(src.0);
            w.push(dst.0);
        }
        // Argument-less kinds append nothing beyond id + kind.
        CmdRequest::GetAlignment
        | CmdRequest::GetMaxSize
        | CmdRequest::BufferGetBase
        | CmdRequest::GetTensor
        | CmdRequest::GetDeviceMemory => {}
    }

    buf
}

/// Decodes a command frame back into its request. This is the device side
/// of [`encode_command`]; the host uses it in tests and diagnostics.
pub fn decode_command(buf: &[u8]) -> Result<(CorrelationId, CmdRequest), ProtoError> {
    if buf.len() < CMD_BUFFER_SIZE {
        return Err(ProtoError::ShortBuffer { need: CMD_BUFFER_SIZE, got: buf.len() });
    }

    let id = CorrelationId::from_bytes(buf[..CORRELATION_ID_SIZE].try_into().unwrap());
    let tag = u32::from_le_bytes(buf[CMD_KIND_OFFSET..CMD_KIND_OFFSET + 4].try_into().unwrap());
    let kind = CmdKind::from_u32(tag).ok_or(ProtoError::UnknownCommand(tag))?;

    let mut r = SlotReader { buf, at: CMD_ARGS_OFFSET };
    let req = match kind {
        CmdKind::AllocBuffer => CmdRequest::AllocBuffer {
            buffer: BufferHandle(r.pull()),
            device_ptr: r.pull(),
            size: r.pull(),
        },
        CmdKind::GetAlignment => CmdRequest::GetAlignment,
        CmdKind::GetMaxSize => CmdRequest::GetMaxSize,
        CmdKind::BufferGetBase => CmdRequest::BufferGetBase,
        CmdKind::FreeBuffer => CmdRequest::FreeBuffer {
            buffer: BufferHandle(r.pull()),
            device_ptr: r.pull(),
            size: r.pull(),
        },
        CmdKind::BufferClear => CmdRequest::BufferClear {
            device_ptr: r.pull(),
            size: r.pull(),
            value: r.pull(),
        },
        CmdKind::InitTensor => CmdRequest::InitTensor { device_ptr: r.pull(), size: r.pull() },
        CmdKind::SetTensor => CmdRequest::SetTensor {
            buffer: BufferHandle(r.pull()),
            tensor: TensorHandle(r.pull()),
            device_ptr: r.pull(),
            size: r.pull(),
        },
        CmdKind::GetTensor => CmdRequest::GetTensor,
        CmdKind::MemsetTensor => CmdRequest::MemsetTensor {
            buffer: BufferHandle(r.pull()),
            tensor: TensorHandle(r.pull()),
            value: r.pull(),
            offset: r.pull(),
            size: r.pull(),
        },
        CmdKind::CopyTensor => CmdRequest::CopyTensor {
            buffer: BufferHandle(r.pull()),
            src: TensorHandle(r.pull()),
            dst: TensorHandle(r.pull()),
        },
        CmdKind::GraphCompute => CmdRequest::GraphCompute { device_ptr: r.pull(), size: r.pull() },
        CmdKind::GetDeviceMemory => CmdRequest::GetDeviceMemory,
    };

    Ok((id, req))
}

/// Where the device left result bytes for the host to DMA back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLocation {
    pub device_addr: u64,
    pub size: u64,
}

/// Decoded response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdResponse {
    pub id: CorrelationId,
    pub status: i32,
    /// Present only when the command was issued expecting output.
    pub result: Option<ResultLocation>,
}

/// Encodes a response frame. Host-side this exists for the scripted test
/// device; the real producer is the accelerator firmware.
pub fn encode_response(rsp: &CmdResponse) -> [u8; CMD_BUFFER_SIZE] {
    let mut buf = [0u8; CMD_BUFFER_SIZE];
    buf[..CORRELATION_ID_SIZE].copy_from_slice(rsp.id.as_bytes());
    buf[CMD_KIND_OFFSET..CMD_KIND_OFFSET + 4].copy_from_slice(&rsp.status.to_le_bytes());
    if let Some(loc) = rsp.result {
        let mut w = SlotWriter { buf: &mut buf, at: CMD_ARGS_OFFSET };
        w.push(loc.device_addr);
        w.push(loc.size);
    }
    buf
}

/// Decodes a response frame. `expect_result` mirrors whether the caller
/// supplied an output buffer; without it the trailing pair is not read.
pub fn decode_response(buf: &[u8], expect_result: bool) -> Result<CmdResponse, ProtoError> {
    if buf.len() < CMD_BUFFER_SIZE {
        return Err(ProtoError::ShortBuffer { need: CMD_BUFFER_SIZE, got: buf.len() });
    }

    let id = CorrelationId::from_bytes(buf[..CORRELATION_ID_SIZE].try_into().unwrap());
    let status = i32::from_le_bytes(buf[CMD_KIND_OFFSET..CMD_KIND_OFFSET + 4].try_into().unwrap());
    let result = if expect_result {
        let mut r = SlotReader { buf, at: CMD_ARGS_OFFSET };
        Some(ResultLocation { device_addr: r.pull(), size: r.pull() })
    } else {
        None
    };

    Ok(CmdResponse { id, status, result })
}
