//! Aperture (fixed-address window) transfers.
//!
//! Some device BARs expose a small window that many bus addresses alias
//! onto; the driver services those with an ioctl instead of the streaming
//! read/write path. The request struct layout matches the driver ABI.

use crate::{DmaError, XferChannel};

/// Driver ABI for an aperture transfer. `done` and `error` are filled in
/// by the kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ApertureRequest {
    /// Userspace buffer address.
    pub buffer: u64,
    /// Transfer length in bytes.
    pub len: u32,
    /// Device endpoint address.
    pub ep_addr: u64,
    /// Aperture window size in bytes.
    pub aperture: u32,
    pub done: u32,
    pub error: u32,
}

const fn ioc(dir: u32, ty: u32, nr: u32, size: u32) -> u64 {
    ((dir << 30) | (size << 16) | (ty << 8) | nr) as u64
}

const IOC_WRITE: u32 = 1;
const APERTURE_SIZE: u32 = core::mem::size_of::<ApertureRequest>() as u32;

pub const IOCTL_APERTURE_R: u64 = ioc(IOC_WRITE, b'x' as u32, 0, APERTURE_SIZE);
pub const IOCTL_APERTURE_W: u64 = ioc(IOC_WRITE, b'x' as u32, 1, APERTURE_SIZE);

impl XferChannel {
    /// Issues one aperture transfer on this channel's device node. `req`
    /// is updated in place with the completed byte count.
    pub fn aperture_io(&mut self, code: u64, req: &mut ApertureRequest) -> Result<(), DmaError> {
        let fd = self.raw_fd();
        let rc = unsafe { libc::ioctl(fd, code as libc::c_ulong, req as *mut ApertureRequest) };
        if rc != 0 {
            return Err(DmaError::Io(std::io::Error::last_os_error()));
        }
        if req.error != 0 || (req.done as usize) < req.len as usize {
            return Err(DmaError::Underflow {
                requested: req.len as usize,
                completed: req.done as usize,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_matches_driver_abi() {
        // u64 | u32 (pad) | u64 | u32 u32 u32 (pad) under repr(C).
        assert_eq!(core::mem::size_of::<ApertureRequest>(), 40);
    }

    #[test]
    fn ioctl_codes_follow_ioc_encoding() {
        assert_eq!(IOCTL_APERTURE_R & 0xff, 0);
        assert_eq!(IOCTL_APERTURE_W & 0xff, 1);
        assert_eq!((IOCTL_APERTURE_W >> 8) & 0xff, u64::from(b'x'));
        assert_eq!((IOCTL_APERTURE_W >> 16) & 0x3fff, 40);
        // Userspace-write direction bit.
        assert_eq!(IOCTL_APERTURE_W >> 30, 1);
    }
}
