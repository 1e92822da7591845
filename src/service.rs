//! Service lifecycle and the data pipeline.
//!
//! `Service::start` wires configuration, the initial device handle, the
//! registry and the watchdog together; `run` then parks until a shutdown
//! signal arrives. Startup failures are fatal and propagate; once the
//! watchdog is running, every failure is handled inside its cycles.

use crate::config::ServiceConfig;
use crate::devices::{self, usb, DataCallback};
use crate::error::Result;
use crate::power::KeepAwake;
use crate::registry::DeviceRegistry;
use crate::transport;
use crate::watchdog::{
    ConnectionHealthMonitor, FlagChannel, RecoveryCoordinator, WatchdogState, WatchdogTiming,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Payload families coming off the readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Magnetic-stripe card tracks.
    CardTrack,
    /// Machine-readable zone of a travel document.
    Mrz,
}

/// Classify a payload by its leading track sentinel. Card track data opens
/// with `C`; MRZ lines that merely start with the same letter (the Italian
/// document prefix, `CA` documents) stay MRZ.
pub fn classify_payload(data: &str) -> PayloadKind {
    let lower = data.to_lowercase();
    if data.starts_with('C') && !lower.starts_with("c<ita") && !lower.starts_with("ca") {
        PayloadKind::CardTrack
    } else {
        PayloadKind::Mrz
    }
}

/// Routes decoded payloads downstream and feeds the liveness clock.
///
/// Every payload arrival notifies the watchdog first, so delivery problems
/// can never make a healthy reader look dead. Delivery itself opens a fresh
/// connection per payload and swallows all errors.
pub struct DataPipeline {
    config: Arc<ServiceConfig>,
    state: Arc<WatchdogState>,
}

impl DataPipeline {
    pub fn new(config: Arc<ServiceConfig>, state: Arc<WatchdogState>) -> Self {
        Self { config, state }
    }

    pub fn into_callback(self) -> DataCallback {
        let pipeline = Arc::new(self);
        Arc::new(move |payload: String| pipeline.handle(payload))
    }

    fn handle(&self, payload: String) {
        self.state.notify_data_received();

        if payload.is_empty() {
            warn!("empty payload received, nothing to deliver");
            return;
        }

        let kind = classify_payload(&payload);
        if self.config.debug {
            info!(kind = ?kind, len = payload.len(), "delivering payload");
        }

        let framed = format!("{}{}", self.config.delivery.row_separator, payload);
        match transport::create_connection(&self.config.delivery) {
            Ok(mut connection) => match connection.send(&framed) {
                Ok(ack) => debug!(ack = %ack, "payload delivered"),
                Err(e) => error!(error = %e, "payload delivery failed"),
            },
            Err(e) => error!(error = %e, "could not open delivery connection"),
        }
    }
}

pub struct Service {
    registry: Arc<DeviceRegistry>,
    monitor: ConnectionHealthMonitor,
    _keep_awake: KeepAwake,
}

impl Service {
    /// Bring the service up: restart-acknowledgment check, keep-awake,
    /// initial device handle, watchdog schedules. Errors here abort
    /// startup; nothing after this returns errors to the caller.
    pub fn start(config: ServiceConfig) -> Result<Self> {
        info!("initializing document scanner bridge");
        let config = Arc::new(config);

        let flags = Arc::new(FlagChannel::new(config.data_dir()));
        flags.consume_restart_acknowledgment();

        let keep_awake = KeepAwake::acquire();

        if !usb::usb_devices_available() {
            warn!("initial USB device check found nothing");
        }
        if usb::scanner_present(&config.device.usb_id_fragment) {
            info!(fragment = %config.device.usb_id_fragment, "scanner visible in USB enumeration");
        }

        let state = Arc::new(WatchdogState::new());
        let registry = Arc::new(DeviceRegistry::new());
        let callback = DataPipeline::new(Arc::clone(&config), Arc::clone(&state)).into_callback();

        info!(device = %config.device.kind, "initializing device");
        let mut device = devices::create_device(&config)?;
        device.set_data_callback(Arc::clone(&callback));
        device.connect()?;
        registry.install(device);

        let coordinator = Arc::new(RecoveryCoordinator::new(
            Arc::clone(&config),
            Arc::clone(&state),
            Arc::clone(&registry),
            Arc::clone(&flags),
            callback,
            Box::new(devices::create_device),
        ));

        let monitor = ConnectionHealthMonitor::new(
            state,
            Arc::clone(&registry),
            coordinator,
            flags,
            WatchdogTiming::from(&config.watchdog),
        );
        monitor.start();

        info!("scanner monitoring system initialized");
        Ok(Self {
            registry,
            monitor,
            _keep_awake: keep_awake,
        })
    }

    /// Block until SIGINT (or SIGTERM on unix), then shut down in order.
    pub fn run(self) -> Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))?;
        #[cfg(unix)]
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))?;

        info!("service running, waiting for shutdown signal");
        while !shutdown.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(250));
        }

        info!("shutdown signal received");
        self.stop();
        Ok(())
    }

    /// Orderly shutdown: schedules first, then the device handle.
    pub fn stop(self) {
        info!("disposing scanner watchdog");
        self.monitor.stop();

        if let Some(mut device) = self.registry.take() {
            if let Err(e) = device.disconnect() {
                error!(error = %e, "error disconnecting scanner during shutdown");
            }
        }
        info!("service stopped");
    }
}
