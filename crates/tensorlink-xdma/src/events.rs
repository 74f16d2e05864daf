//! Device-to-host interrupt delivery through the event character device.
//!
//! The device completes a command by raising its event line; the driver
//! makes that readable as a 4-byte interrupt cause. Waiting polls in
//! short slices so an overall deadline can be enforced without losing the
//! default of waiting indefinitely.

use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::DmaError;

const POLL_SLICE_MS: libc::c_int = 256;

pub struct EventChannel {
    file: File,
}

impl EventChannel {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DmaError> {
        Ok(EventChannel { file: File::open(path)? })
    }

    /// Wraps an already-open readable file, so tests can drive waits
    /// through a pipe.
    pub fn from_file(file: File) -> Self {
        EventChannel { file }
    }

    /// Blocks until the device raises its event line, then reads and
    /// returns the interrupt cause. With `timeout` of `None` this waits
    /// indefinitely.
    ///
    /// # Panics
    ///
    /// Panics if polling the event device itself fails; at that point the
    /// interrupt path is gone and no command can ever complete.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<u32, DmaError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut fds = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let rc = unsafe { libc::poll(&mut fds, 1, POLL_SLICE_MS) };
            if rc < 0 {
                panic!("poll on event channel failed: {}", io::Error::last_os_error());
            }
            if rc > 0 && fds.revents & libc::POLLIN != 0 {
                let mut cause = [0u8; 4];
                self.file.read_exact(&mut cause)?;
                let cause = u32::from_le_bytes(cause);
                trace!(cause, "device interrupt");
                return Ok(cause);
            }
            if let (Some(deadline), Some(limit)) = (deadline, timeout) {
                if Instant::now() >= deadline {
                    return Err(DmaError::IrqTimeout(limit));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::FromRawFd;

    fn pipe() -> (File, File) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) }
    }

    #[test]
    fn delivers_pending_cause() {
        let (rx, mut tx) = pipe();
        tx.write_all(&7u32.to_le_bytes()).unwrap();
        let mut events = EventChannel::from_file(rx);
        assert_eq!(events.wait(None).unwrap(), 7);
    }

    #[test]
    fn times_out_when_line_stays_quiet() {
        let (rx, _tx) = pipe();
        let mut events = EventChannel::from_file(rx);
        match events.wait(Some(Duration::from_millis(300))) {
            Err(DmaError::IrqTimeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
