//! Streaming DMA over the bridge's character devices.
//!
//! Each channel wraps one unidirectional device node. The file is opened on
//! first use so a context can be constructed before the driver is loaded;
//! an open failure at transfer time is unrecoverable and panics.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::DmaError;

/// Largest byte count the kernel accepts in a single read/write; larger
/// transfers are split into chunks of this size.
pub const RW_MAX_SIZE: usize = 0x7fff_f000;

/// One unidirectional DMA channel. Device addresses are expressed as file
/// offsets; the driver translates them onto the PCIe bus.
pub struct XferChannel {
    path: PathBuf,
    file: Option<File>,
}

impl XferChannel {
    pub fn new(path: impl AsRef<Path>) -> Self {
        XferChannel { path: path.as_ref().to_path_buf(), file: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wraps an already-open file, mainly so tests can substitute a
    /// regular file for the device node.
    pub fn from_file(file: File) -> Self {
        XferChannel { path: PathBuf::new(), file: Some(file) }
    }

    /// # Panics
    ///
    /// Panics if the device node cannot be opened.
    fn file(&mut self) -> &mut File {
        if self.file.is_none() {
            match OpenOptions::new().read(true).write(true).open(&self.path) {
                Ok(f) => self.file = Some(f),
                Err(e) => panic!("failed to open dma channel {}: {e}", self.path.display()),
            }
        }
        self.file.as_mut().unwrap()
    }

    pub(crate) fn raw_fd(&mut self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.file().as_raw_fd()
    }

    /// Reads `out.len()` bytes from device address `dev_addr`.
    pub fn read_at(&mut self, dev_addr: u64, out: &mut [u8]) -> Result<(), DmaError> {
        let requested = out.len();
        let file = self.file();
        let mut done = 0usize;
        while done < requested {
            let chunk = (requested - done).min(RW_MAX_SIZE);
            let offset = dev_addr + done as u64;
            if offset != 0 {
                file.seek(SeekFrom::Start(offset))?;
            }
            let n = file.read(&mut out[done..done + chunk])?;
            done += n;
            if n < chunk {
                warn!(requested, done, offset, "short dma read");
                break;
            }
        }
        if done != requested {
            return Err(DmaError::Underflow { requested, completed: done });
        }
        Ok(())
    }

    /// Writes `data` to device address `dev_addr` and flushes it to the
    /// device before returning.
    pub fn write_at(&mut self, dev_addr: u64, data: &[u8]) -> Result<(), DmaError> {
        let requested = data.len();
        let file = self.file();
        let mut done = 0usize;
        while done < requested {
            let chunk = (requested - done).min(RW_MAX_SIZE);
            let offset = dev_addr + done as u64;
            if offset != 0 {
                file.seek(SeekFrom::Start(offset))?;
            }
            let n = file.write(&data[done..done + chunk])?;
            done += n;
            if n < chunk {
                warn!(requested, done, offset, "short dma write");
                break;
            }
        }
        file.sync_data()?;
        if done != requested {
            return Err(DmaError::Underflow { requested, completed: done });
        }
        Ok(())
    }
}
