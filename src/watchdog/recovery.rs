//! Recovery coordinator: teardown and recreation of the device handle.
//!
//! All recoveries are single-flight. The gate lives in [`WatchdogState`];
//! a trigger that arrives while a recovery is in flight returns
//! immediately without touching the hardware. Repeated failures escalate
//! to the external supervisor instead of retrying forever.

use crate::config::ServiceConfig;
use crate::devices::{usb, DataCallback, DeviceAdapter};
use crate::error::{BridgeError, Result};
use crate::registry::DeviceRegistry;
use crate::watchdog::flags::FlagChannel;
use crate::watchdog::state::WatchdogState;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What observed the failure that triggered this recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// Data silence exceeded the configured threshold.
    Timeout,
    /// An operator wrote the manual reconnect flag.
    ManualFlag,
    /// The device handle or USB enumeration reported the reader gone.
    ConnectionLost,
}

impl fmt::Display for RecoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoverySource::Timeout => write!(f, "timeout"),
            RecoverySource::ManualFlag => write!(f, "manual-flag"),
            RecoverySource::ConnectionLost => write!(f, "connection-lost"),
        }
    }
}

/// One recovery trigger. Not persisted beyond the cycle it starts.
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub source: RecoverySource,
    pub requested_at: DateTime<Utc>,
}

impl RecoveryRequest {
    pub fn new(source: RecoverySource) -> Self {
        Self {
            source,
            requested_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A fresh handle is connected and registered.
    Recovered,
    /// Another recovery held the gate; nothing was done.
    AlreadyInProgress,
    /// The attempt budget is exhausted; the supervisor was signalled and
    /// no teardown or recreation ran this cycle.
    Escalated,
}

/// Builds replacement device handles. Injected so tests can count and
/// script constructions.
pub type DeviceFactory =
    Box<dyn Fn(&ServiceConfig) -> Result<Box<dyn DeviceAdapter>> + Send + Sync>;

pub struct RecoveryCoordinator {
    session: Uuid,
    config: Arc<ServiceConfig>,
    state: Arc<WatchdogState>,
    registry: Arc<DeviceRegistry>,
    flags: Arc<FlagChannel>,
    callback: DataCallback,
    factory: DeviceFactory,
    settle_delay: Duration,
    escalation_threshold: u32,
}

impl RecoveryCoordinator {
    pub fn new(
        config: Arc<ServiceConfig>,
        state: Arc<WatchdogState>,
        registry: Arc<DeviceRegistry>,
        flags: Arc<FlagChannel>,
        callback: DataCallback,
        factory: DeviceFactory,
    ) -> Self {
        let settle_delay = config.settle_delay();
        let escalation_threshold = config.watchdog.escalation_threshold;
        Self {
            session: Uuid::new_v4(),
            config,
            state,
            registry,
            flags,
            callback,
            factory,
            settle_delay,
            escalation_threshold,
        }
    }

    /// Run one recovery cycle for the given trigger.
    ///
    /// Single-flight: when another recovery holds the gate this returns
    /// `AlreadyInProgress` without side effects. Otherwise the attempt
    /// counter is bumped, and either the supervisor is signalled
    /// (`Escalated`) or a teardown/recreate cycle runs. The liveness clock
    /// restarts when the gate is released, on every path.
    pub fn recover(&self, request: RecoveryRequest) -> Result<RecoveryOutcome> {
        let Some(_gate) = self.state.try_begin_recovery() else {
            debug!(source = %request.source, "recovery already in progress, skipping trigger");
            return Ok(RecoveryOutcome::AlreadyInProgress);
        };

        let attempt = self.state.record_attempt();
        info!(
            session = %self.session,
            source = %request.source,
            requested_at = %request.requested_at.to_rfc3339(),
            attempt,
            "recovery cycle starting"
        );

        if attempt >= self.escalation_threshold {
            warn!(
                attempt,
                threshold = self.escalation_threshold,
                "repeated recovery failures, requesting service restart"
            );
            match self.flags.write_restart_request() {
                Ok(()) => info!(path = %self.flags.restart_required_path().display(), "restart request written"),
                Err(e) => error!(error = %e, "failed to write restart request"),
            }
            // Start the count over so a slow supervisor is not re-signalled
            // on every following cycle.
            self.state.reset_attempts();
            return Ok(RecoveryOutcome::Escalated);
        }

        self.release_current_handle();

        debug!(delay = ?self.settle_delay, "waiting for the native layer to settle");
        std::thread::sleep(self.settle_delay);

        match self.create_and_connect() {
            Ok(device) => {
                self.registry.install(device);
                self.state.reset_attempts();
                info!(session = %self.session, "device reinitialization completed");
                Ok(RecoveryOutcome::Recovered)
            }
            Err(primary_err) => {
                warn!(error = %primary_err, "reinitialization failed, retrying without releasing the failed handle");
                match self.create_and_connect() {
                    Ok(device) => {
                        self.registry.install(device);
                        self.state.reset_attempts();
                        info!(session = %self.session, "fallback reinitialization completed");
                        Ok(RecoveryOutcome::Recovered)
                    }
                    Err(fallback_err) => {
                        error!(
                            error = %fallback_err,
                            attempt,
                            "fallback reinitialization failed, leaving attempt counted"
                        );
                        Err(fallback_err)
                    }
                }
            }
        }
    }

    /// Release the active handle, best-effort. A failed disconnect is
    /// logged and ignored: a hung release must not block the recreation
    /// that follows.
    fn release_current_handle(&self) {
        match self.registry.take() {
            Some(mut old) => {
                info!(kind = %old.kind(), "releasing current device handle");
                if let Err(e) = old.disconnect() {
                    let release_err = BridgeError::ResourceRelease(e.to_string());
                    warn!(error = %release_err, "continuing recovery despite failed release");
                }
                drop(old);
            }
            None => {
                let usb_ok = usb::usb_devices_available();
                warn!(usb_devices = usb_ok, "no active device handle to release");
            }
        }
    }

    /// Build a replacement handle, wire the data callback and connect.
    ///
    /// A handle whose connect failed is deliberately leaked instead of
    /// dropped: its teardown can block inside the vendor layer, and a
    /// kiosk is better off leaking one dead handle than hanging recovery.
    fn create_and_connect(&self) -> Result<Box<dyn DeviceAdapter>> {
        let mut device = (self.factory)(&self.config)?;
        device.set_data_callback(Arc::clone(&self.callback));

        match device.connect() {
            Ok(()) => Ok(device),
            Err(e) => {
                warn!(error = %e, "leaking unconnected handle rather than risking a blocked teardown");
                std::mem::forget(device);
                Err(BridgeError::ConnectFailed(e.to_string()))
            }
        }
    }

    pub fn session(&self) -> Uuid {
        self.session
    }
}
