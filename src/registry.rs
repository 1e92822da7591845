//! Device registry: the single slot holding the active device handle.
//!
//! Exactly one handle is active at a time. Only the recovery path replaces
//! the slot contents, and only while holding the recovery gate; every other
//! component reads the slot for probes.

use crate::devices::{DeviceAdapter, DeviceKind};
use std::sync::Mutex;
use tracing::warn;

pub struct DeviceRegistry {
    active: Mutex<Option<Box<dyn DeviceAdapter>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
        }
    }

    /// Install a handle as the active device, returning any handle that was
    /// still in the slot. Recovery takes the old handle out first; a
    /// non-empty slot here means a release was skipped upstream.
    pub fn install(&self, device: Box<dyn DeviceAdapter>) -> Option<Box<dyn DeviceAdapter>> {
        let mut slot = self.active.lock().unwrap();
        let previous = slot.replace(device);
        if previous.is_some() {
            warn!("replaced a device handle that was never released");
        }
        previous
    }

    /// Remove and return the active handle, leaving the slot empty.
    pub fn take(&self) -> Option<Box<dyn DeviceAdapter>> {
        self.active.lock().unwrap().take()
    }

    /// Probe the active handle. An empty slot reports disconnected.
    pub fn is_connected(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|d| d.is_connected())
            .unwrap_or(false)
    }

    pub fn active_kind(&self) -> Option<DeviceKind> {
        self.active.lock().unwrap().as_ref().map(|d| d.kind())
    }

    pub fn has_active(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::DataCallback;
    use crate::error::Result;

    struct StubDevice {
        connected: bool,
    }

    impl DeviceAdapter for StubDevice {
        fn kind(&self) -> DeviceKind {
            DeviceKind::AccessIs
        }
        fn set_data_callback(&mut self, _callback: DataCallback) {}
        fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }
        fn disconnect(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    #[test]
    fn empty_registry_reports_disconnected() {
        let registry = DeviceRegistry::new();
        assert!(!registry.is_connected());
        assert!(!registry.has_active());
        assert!(registry.take().is_none());
    }

    #[test]
    fn install_take_roundtrip() {
        let registry = DeviceRegistry::new();
        assert!(registry
            .install(Box::new(StubDevice { connected: true }))
            .is_none());
        assert!(registry.is_connected());
        assert_eq!(registry.active_kind(), Some(DeviceKind::AccessIs));

        let taken = registry.take().unwrap();
        assert!(taken.is_connected());
        assert!(!registry.has_active());
    }

    #[test]
    fn install_over_live_handle_returns_it() {
        let registry = DeviceRegistry::new();
        registry.install(Box::new(StubDevice { connected: true }));
        let previous = registry.install(Box::new(StubDevice { connected: false }));
        assert!(previous.is_some());
        assert!(!registry.is_connected());
    }
}
