use std::path::PathBuf;
use std::time::Duration;

/// Offset of the command frame within the exchange area.
pub const CMD_SEND_OFFSET: u64 = 3 * 1024;

/// Offset of the response frame, one frame above the command slot.
pub const CMD_RECV_OFFSET: u64 = CMD_SEND_OFFSET + 512;

/// Everything needed to bring up one accelerator: device node paths, the
/// physical address of the interrupt register window, and the device-side
/// memory map the host mirrors.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Host-to-card streaming DMA device.
    pub h2c_path: PathBuf,
    /// Card-to-host streaming DMA device.
    pub c2h_path: PathBuf,
    /// Interrupt event device.
    pub event_path: PathBuf,
    /// Physical base of the bridge's interrupt registers.
    pub reg_base: u64,
    /// Allocation granularity of the device heap, power of two.
    pub alignment: u64,
    /// Device-side arena the host allocator manages.
    pub buffer_base: u64,
    pub buffer_size: u64,
    /// Base of the fixed command-exchange area in device memory.
    pub cmd_exchange_base: u64,
    /// Overall bound on one interrupt wait. `None` waits indefinitely,
    /// which matches a healthy device that always answers.
    pub wait_timeout: Option<Duration>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            h2c_path: PathBuf::from("/dev/xdma0_h2c_0"),
            c2h_path: PathBuf::from("/dev/xdma0_c2h_0"),
            event_path: PathBuf::from("/dev/xdma0_events_3"),
            reg_base: 0x8600_0000,
            alignment: 32,
            buffer_base: 0x0010_0000,
            buffer_size: 0x0400_0000,
            cmd_exchange_base: 0,
            wait_timeout: None,
        }
    }
}

impl DeviceConfig {
    pub fn cmd_send_addr(&self) -> u64 {
        self.cmd_exchange_base + CMD_SEND_OFFSET
    }

    pub fn cmd_recv_addr(&self) -> u64 {
        self.cmd_exchange_base + CMD_RECV_OFFSET
    }
}
