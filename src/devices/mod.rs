//! Device adapters.
//!
//! Every hardware family is wrapped behind the same [`DeviceAdapter`]
//! capability so the watchdog and registry never branch on a concrete
//! device type. Adapters own their native handles and release them on
//! drop; the recovery path relies on that for deterministic teardown.

pub mod accessis;
pub mod idbox;
pub mod usb;

use crate::config::ServiceConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use accessis::AccessIsDevice;
pub use idbox::IdBoxDevice;

/// Callback invoked with each decoded payload from the hardware.
pub type DataCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// AccessIS magnetic-stripe / MRZ reader (USB HID).
    AccessIs,
    /// IDBox passport reader (serial).
    IdBox,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::AccessIs => write!(f, "accessis"),
            DeviceKind::IdBox => write!(f, "idbox"),
        }
    }
}

/// Uniform capability surface over one physical scanner.
///
/// `is_connected` must be cheap enough to call from a periodic probe and
/// must never panic; a broken handle reports `false`.
pub trait DeviceAdapter: Send {
    fn kind(&self) -> DeviceKind;

    /// Register the payload callback. Must be called before `connect` so
    /// data arriving during warm-up is not dropped.
    fn set_data_callback(&mut self, callback: DataCallback);

    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Construct the adapter selected by configuration. The handle is not
/// connected yet; callers wire the data callback first.
pub fn create_device(config: &ServiceConfig) -> Result<Box<dyn DeviceAdapter>> {
    match config.device.kind {
        DeviceKind::AccessIs => Ok(Box::new(AccessIsDevice::new(&config.device))),
        DeviceKind::IdBox => Ok(Box::new(IdBoxDevice::new(&config.device))),
    }
}
