//! Connection-health watchdog.
//!
//! The watchdog reconciles three signals of device health: the age of the
//! last received payload, the active handle's own liveness probe and the
//! OS view of the USB bus. When a device is presumed dead it drives a
//! single-flight teardown/recreate cycle, and after repeated failures it
//! stops self-healing and asks the external supervisor for a process
//! restart through a sentinel file.
//!
//! ```text
//! hardware callback ──► WatchdogState (liveness clock)
//!                            ▲   │
//!        health schedule ────┘   ▼ gate
//!        flag schedule ──► RecoveryCoordinator ──► new device handle
//!                 │                                      │
//!                 ▼                                      ▼
//!           FlagChannel                           DeviceRegistry
//! ```

pub mod flags;
pub mod monitor;
pub mod recovery;
pub mod state;

pub use flags::FlagChannel;
pub use monitor::{ConnectionHealthMonitor, WatchdogTiming};
pub use recovery::{
    DeviceFactory, RecoveryCoordinator, RecoveryOutcome, RecoveryRequest, RecoverySource,
};
pub use state::{LivenessSnapshot, WatchdogState};
