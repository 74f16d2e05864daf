//! Host side of the tensor-offload backend.
//!
//! A [`HostContext`] owns one [`BackendDevice`] per accelerator. Each
//! device mirrors the accelerator's memory with a local heap, serializes
//! commands over the DMA bridge, rings the doorbell, and blocks until the
//! device answers. The protocol is strictly one command in flight per
//! device; every operation takes `&mut self` so that contract is enforced
//! by the borrow checker rather than by convention.

mod config;
mod context;
mod device;
mod error;
mod handle;

pub use config::{DeviceConfig, CMD_RECV_OFFSET, CMD_SEND_OFFSET};
pub use context::HostContext;
pub use device::{BackendDevice, DeviceBuffer};
pub use error::HostError;
pub use handle::HandleAllocator;

pub use tensorlink_proto::{
    BufferHandle, GraphDesc, TensorFlags, TensorHandle, TensorRecord,
};
