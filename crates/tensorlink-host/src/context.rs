use tracing::info;

use crate::{BackendDevice, DeviceConfig, HostError};

/// Owns every backend device in the process. Built once at startup and
/// threaded by reference through the embedding application; there is no
/// hidden global instance.
pub struct HostContext {
    devices: Vec<BackendDevice>,
}

impl HostContext {
    /// Opens one backend device per config entry.
    pub fn open(configs: Vec<DeviceConfig>) -> Result<Self, HostError> {
        let mut devices = Vec::with_capacity(configs.len());
        for (id, config) in configs.into_iter().enumerate() {
            let dev = BackendDevice::open(id, config)?;
            info!(id, name = dev.name(), "backend device ready");
            devices.push(dev);
        }
        Ok(HostContext { devices })
    }

    /// Builds a context around already-assembled devices, for tests.
    pub fn from_devices(devices: Vec<BackendDevice>) -> Self {
        HostContext { devices }
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// # Panics
    ///
    /// Panics when `index` does not name a configured device.
    pub fn device(&self, index: usize) -> &BackendDevice {
        match self.devices.get(index) {
            Some(dev) => dev,
            None => panic!("no backend device at index {index}"),
        }
    }

    /// # Panics
    ///
    /// Panics when `index` does not name a configured device.
    pub fn device_mut(&mut self, index: usize) -> &mut BackendDevice {
        match self.devices.get_mut(index) {
            Some(dev) => dev,
            None => panic!("no backend device at index {index}"),
        }
    }
}
