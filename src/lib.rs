//! scanner-bridge: a kiosk service bridging card/MRZ scanning hardware to
//! downstream consumers, built around a connection-health watchdog that
//! detects silent hardware disconnection and recreates device handles
//! without restarting the process.

pub mod config;
pub mod devices;
pub mod error;
pub mod power;
pub mod registry;
pub mod service;
pub mod transport;
pub mod watchdog;

// Re-export the types most callers need
pub use config::ServiceConfig;
pub use error::{BridgeError, Result};
pub use service::Service;

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One-shot cancellation shared by the periodic schedules.
///
/// `wait_for` doubles as the schedule sleep: it returns early, and `true`,
/// as soon as shutdown is triggered, so a stop request never waits out a
/// full check interval.
pub struct Shutdown {
    triggered: Mutex<bool>,
    signal: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            triggered: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    pub fn trigger(&self) {
        let mut triggered = self.triggered.lock().unwrap();
        *triggered = true;
        self.signal.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock().unwrap()
    }

    /// Sleep for `timeout` or until triggered, whichever comes first.
    /// Returns whether shutdown was triggered.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock().unwrap();
        loop {
            if *triggered {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.signal.wait_timeout(triggered, deadline - now).unwrap();
            triggered = guard;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
