//! Doorbell interrupt towards the device.
//!
//! The bridge exposes a trigger register at the window base and a clear
//! register one word above it; the backend's doorbell is a single bit in
//! each. [`DeviceIrq`] is the seam that lets tests substitute a scripted
//! device for the real register file.

use crate::{DmaError, RegisterWindow};

/// Doorbell bit for the backend's user interrupt line.
pub const IRQ_BIT: u32 = 1 << 3;

pub trait DeviceIrq {
    /// Raises the host-to-device doorbell.
    fn trigger(&mut self);

    /// Acknowledges the doorbell after the device has answered.
    fn clear(&mut self);
}

/// The real doorbell: writes into the bridge's interrupt registers via a
/// mapped physical window.
pub struct MmioDeviceIrq {
    regs: RegisterWindow,
    base: u64,
}

impl MmioDeviceIrq {
    pub fn open(base: u64) -> Result<Self, DmaError> {
        Ok(MmioDeviceIrq { regs: RegisterWindow::open()?, base })
    }
}

impl DeviceIrq for MmioDeviceIrq {
    fn trigger(&mut self) {
        self.regs.write_u32(self.base, IRQ_BIT);
    }

    fn clear(&mut self) {
        self.regs.write_u32(self.base + 4, IRQ_BIT);
    }
}
