//! Userspace plumbing for the PCIe DMA bridge.
//!
//! Three kernel surfaces are wrapped here: the streaming DMA character
//! devices (host-to-card and card-to-host), the `/dev/mem` window over the
//! bridge's interrupt registers, and the event character device that
//! delivers device-to-host interrupts.

mod aperture;
mod channel;
mod error;
mod events;
mod irq;
mod regs;

pub use aperture::{ApertureRequest, IOCTL_APERTURE_R, IOCTL_APERTURE_W};
pub use channel::{XferChannel, RW_MAX_SIZE};
pub use error::DmaError;
pub use events::EventChannel;
pub use irq::{DeviceIrq, MmioDeviceIrq, IRQ_BIT};
pub use regs::RegisterWindow;
