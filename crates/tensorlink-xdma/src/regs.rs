//! Physical register access through `/dev/mem`.
//!
//! Only one page is mapped at a time; accesses that land on a different
//! page remap the window. All accesses are volatile 32-bit loads/stores,
//! matching what the bridge's register file accepts.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::ptr;

use crate::DmaError;

pub struct RegisterWindow {
    file: File,
    map: *mut libc::c_void,
    mapped_page: u64,
    page_size: u64,
}

impl RegisterWindow {
    pub fn open() -> Result<Self, DmaError> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/mem")?;
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        Ok(RegisterWindow { file, map: libc::MAP_FAILED, mapped_page: u64::MAX, page_size })
    }

    /// # Panics
    ///
    /// Panics if the page containing `phys_addr` cannot be mapped; register
    /// access is load-bearing for interrupt delivery and cannot degrade.
    fn slot(&mut self, phys_addr: u64) -> *mut u32 {
        let page = phys_addr & !(self.page_size - 1);
        if page != self.mapped_page {
            if self.map != libc::MAP_FAILED {
                unsafe { libc::munmap(self.map, self.page_size as usize) };
            }
            let map = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    self.page_size as usize,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    self.file.as_raw_fd(),
                    page as libc::off_t,
                )
            };
            if map == libc::MAP_FAILED {
                panic!(
                    "failed to map register page {page:#x}: {}",
                    std::io::Error::last_os_error()
                );
            }
            self.map = map;
            self.mapped_page = page;
        }
        let off = (phys_addr - self.mapped_page) as usize;
        unsafe { (self.map as *mut u8).add(off) as *mut u32 }
    }

    pub fn read_u32(&mut self, phys_addr: u64) -> u32 {
        let p = self.slot(phys_addr);
        unsafe { ptr::read_volatile(p) }
    }

    pub fn write_u32(&mut self, phys_addr: u64, value: u32) {
        let p = self.slot(phys_addr);
        unsafe { ptr::write_volatile(p, value) }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        if self.map != libc::MAP_FAILED {
            unsafe { libc::munmap(self.map, self.page_size as usize) };
        }
    }
}
