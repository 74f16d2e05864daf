//! Serialized tensor record: the fixed-size, byte-packed mirror of a
//! runtime tensor descriptor that crosses the wire for INIT_TENSOR.
//!
//! The element type and operation tags are runtime-defined and carried
//! opaquely; handle fields are correlation tokens resolved only by the
//! device's own id map.

use bitflags::bitflags;

use crate::{BufferHandle, ProtoError, TensorHandle};

/// Maximum tensor rank carried on the wire.
pub const MAX_DIMS: usize = 4;
/// Size of the fixed operation parameter block, in 32-bit words.
pub const OP_PARAM_WORDS: usize = 16;
/// Maximum number of source-tensor ids.
pub const MAX_SRC: usize = 10;
/// Bounded tensor name, NUL-padded.
pub const MAX_NAME: usize = 64;

bitflags! {
    /// Tensor flag bits, forwarded verbatim from the runtime.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TensorFlags: i32 {
        const INPUT = 1 << 0;
        const OUTPUT = 1 << 1;
        const PARAM = 1 << 2;
        const LOSS = 1 << 3;
    }
}

/// Wire mirror of one tensor descriptor.
///
/// Field order and widths are the wire contract (see the module docs); the
/// encoded form is little-endian, densely packed, and padded at the tail so
/// the total is a multiple of 8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorRecord {
    /// Identity of this tensor on the wire; never dereferenced remotely.
    pub id: TensorHandle,
    /// Runtime element-type tag, opaque here.
    pub dtype: u32,
    /// Owning buffer.
    pub buffer: BufferHandle,
    /// Per-dimension extents.
    pub ne: [u32; MAX_DIMS],
    /// Per-dimension strides in bytes.
    pub nb: [u32; MAX_DIMS],
    /// Runtime operation tag, opaque here.
    pub op: u32,
    /// Fixed operation parameter block.
    pub op_params: [i32; OP_PARAM_WORDS],
    pub flags: TensorFlags,
    /// Source-tensor ids; unused slots are zero.
    pub src: [TensorHandle; MAX_SRC],
    /// For view tensors: the viewed tensor's id (zero when not a view) and
    /// the byte offset into its storage.
    pub view_src: TensorHandle,
    pub view_offs: u64,
    /// Device-resident data pointer.
    pub data: u64,
    /// Size of the tensor's data in bytes.
    pub data_size: u64,
    /// NUL-padded name bytes.
    pub name: [u8; MAX_NAME],
}

impl Default for TensorRecord {
    fn default() -> Self {
        TensorRecord {
            id: TensorHandle(0),
            dtype: 0,
            buffer: BufferHandle(0),
            ne: [0; MAX_DIMS],
            nb: [0; MAX_DIMS],
            op: 0,
            op_params: [0; OP_PARAM_WORDS],
            flags: TensorFlags::empty(),
            src: [TensorHandle(0); MAX_SRC],
            view_src: TensorHandle(0),
            view_offs: 0,
            data: 0,
            data_size: 0,
            name: [0; MAX_NAME],
        }
    }
}

// Packed little-endian field offsets.
const OFF_ID: usize = 0;
const OFF_DTYPE: usize = 8;
const OFF_BUFFER: usize = 12;
const OFF_NE: usize = 20;
const OFF_NB: usize = 36;
const OFF_OP: usize = 52;
const OFF_OP_PARAMS: usize = 56;
const OFF_FLAGS: usize = 120;
const OFF_SRC: usize = 124;
const OFF_VIEW_SRC: usize = 204;
const OFF_VIEW_OFFS: usize = 212;
const OFF_DATA: usize = 220;
const OFF_DATA_SIZE: usize = 228;
const OFF_NAME: usize = 236;
const PACKED_END: usize = OFF_NAME + MAX_NAME; // 300

impl TensorRecord {
    /// Encoded size: the packed fields rounded up to the 8-byte wire
    /// alignment contract.
    pub const WIRE_SIZE: usize = (PACKED_END + 7) & !7;

    /// Truncates `name` into the record's NUL-padded name field.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; MAX_NAME];
        let bytes = name.as_bytes();
        let n = bytes.len().min(MAX_NAME - 1);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    /// The name up to its first NUL, or `""` if not valid UTF-8.
    pub fn name_str(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_NAME);
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[OFF_ID..OFF_ID + 8].copy_from_slice(&self.id.0.to_le_bytes());
        buf[OFF_DTYPE..OFF_DTYPE + 4].copy_from_slice(&self.dtype.to_le_bytes());
        buf[OFF_BUFFER..OFF_BUFFER + 8].copy_from_slice(&self.buffer.0.to_le_bytes());
        for (i, v) in self.ne.iter().enumerate() {
            buf[OFF_NE + i * 4..OFF_NE + i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        for (i, v) in self.nb.iter().enumerate() {
            buf[OFF_NB + i * 4..OFF_NB + i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        buf[OFF_OP..OFF_OP + 4].copy_from_slice(&self.op.to_le_bytes());
        for (i, v) in self.op_params.iter().enumerate() {
            buf[OFF_OP_PARAMS + i * 4..OFF_OP_PARAMS + i * 4 + 4]
                .copy_from_slice(&v.to_le_bytes());
        }
        buf[OFF_FLAGS..OFF_FLAGS + 4].copy_from_slice(&self.flags.bits().to_le_bytes());
        for (i, v) in self.src.iter().enumerate() {
            buf[OFF_SRC + i * 8..OFF_SRC + i * 8 + 8].copy_from_slice(&v.0.to_le_bytes());
        }
        buf[OFF_VIEW_SRC..OFF_VIEW_SRC + 8].copy_from_slice(&self.view_src.0.to_le_bytes());
        buf[OFF_VIEW_OFFS..OFF_VIEW_OFFS + 8].copy_from_slice(&self.view_offs.to_le_bytes());
        buf[OFF_DATA..OFF_DATA + 8].copy_from_slice(&self.data.to_le_bytes());
        buf[OFF_DATA_SIZE..OFF_DATA_SIZE + 8].copy_from_slice(&self.data_size.to_le_bytes());
        buf[OFF_NAME..OFF_NAME + MAX_NAME].copy_from_slice(&self.name);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtoError> {
        if buf.len() < Self::WIRE_SIZE {
            return Err(ProtoError::ShortBuffer { need: Self::WIRE_SIZE, got: buf.len() });
        }

        let u64_at = |off: usize| u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        let i32_at = |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());

        let mut ne = [0u32; MAX_DIMS];
        let mut nb = [0u32; MAX_DIMS];
        for i in 0..MAX_DIMS {
            ne[i] = u32_at(OFF_NE + i * 4);
            nb[i] = u32_at(OFF_NB + i * 4);
        }
        let mut op_params = [0i32; OP_PARAM_WORDS];
        for (i, p) in op_params.iter_mut().enumerate() {
            *p = i32_at(OFF_OP_PARAMS + i * 4);
        }
        let mut src = [TensorHandle(0); MAX_SRC];
        for (i, s) in src.iter_mut().enumerate() {
            *s = TensorHandle(u64_at(OFF_SRC + i * 8));
        }
        let mut name = [0u8; MAX_NAME];
        name.copy_from_slice(&buf[OFF_NAME..OFF_NAME + MAX_NAME]);

        Ok(TensorRecord {
            id: TensorHandle(u64_at(OFF_ID)),
            dtype: u32_at(OFF_DTYPE),
            buffer: BufferHandle(u64_at(OFF_BUFFER)),
            ne,
            nb,
            op: u32_at(OFF_OP),
            op_params,
            flags: TensorFlags::from_bits_retain(i32_at(OFF_FLAGS)),
            src,
            view_src: TensorHandle(u64_at(OFF_VIEW_SRC)),
            view_offs: u64_at(OFF_VIEW_OFFS),
            data: u64_at(OFF_DATA),
            data_size: u64_at(OFF_DATA_SIZE),
            name,
        })
    }
}

// Wire alignment contract: the record must tile 8-byte slots.
const _: () = assert!(TensorRecord::WIRE_SIZE % 8 == 0);
const _: () = assert!(TensorRecord::WIRE_SIZE == 304);
