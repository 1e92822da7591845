//! Connection health monitor.
//!
//! Two schedules run on dedicated threads: the primary liveness check
//! (delayed past device warm-up, then periodic) and the flag poll, which
//! also writes the status report. Both stop through one condvar-signalled
//! shutdown handle; `stop` joins the threads, so no check body runs after
//! it returns and an in-flight recovery finishes rather than being aborted.

use crate::registry::DeviceRegistry;
use crate::watchdog::flags::FlagChannel;
use crate::watchdog::recovery::{
    RecoveryCoordinator, RecoveryOutcome, RecoveryRequest, RecoverySource,
};
use crate::watchdog::state::WatchdogState;
use crate::Shutdown;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Schedule timing for the monitor. Production values come from
/// configuration; tests shrink them to milliseconds.
#[derive(Debug, Clone)]
pub struct WatchdogTiming {
    /// Data silence beyond this means the device is presumed dead.
    pub reconnect_threshold: Duration,
    /// Cadence of the primary liveness check.
    pub check_interval: Duration,
    /// Cadence of the manual-flag poll and status report.
    pub flag_poll_interval: Duration,
    /// Delay before the first liveness check, covering device warm-up.
    pub warmup_delay: Duration,
}

impl From<&crate::config::WatchdogConfig> for WatchdogTiming {
    fn from(cfg: &crate::config::WatchdogConfig) -> Self {
        Self {
            reconnect_threshold: Duration::from_secs(cfg.reconnect_threshold_secs),
            check_interval: Duration::from_secs(cfg.check_interval_secs),
            flag_poll_interval: Duration::from_secs(cfg.flag_poll_secs),
            warmup_delay: Duration::from_secs(cfg.warmup_delay_secs),
        }
    }
}

pub struct ConnectionHealthMonitor {
    state: Arc<WatchdogState>,
    registry: Arc<DeviceRegistry>,
    coordinator: Arc<RecoveryCoordinator>,
    flags: Arc<FlagChannel>,
    timing: WatchdogTiming,
    shutdown: Arc<Shutdown>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionHealthMonitor {
    pub fn new(
        state: Arc<WatchdogState>,
        registry: Arc<DeviceRegistry>,
        coordinator: Arc<RecoveryCoordinator>,
        flags: Arc<FlagChannel>,
        timing: WatchdogTiming,
    ) -> Self {
        Self {
            state,
            registry,
            coordinator,
            flags,
            timing,
            shutdown: Arc::new(Shutdown::new()),
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Record a payload arrival. Callable from any thread, always succeeds.
    pub fn notify_data_received(&self) {
        self.state.notify_data_received();
    }

    /// Start both schedules. The primary check first fires one warm-up
    /// delay plus one interval after this call.
    pub fn start(&self) {
        let mut threads = self.threads.lock().unwrap();
        if !threads.is_empty() {
            warn!("monitor already started");
            return;
        }

        info!(
            threshold = ?self.timing.reconnect_threshold,
            interval = ?self.timing.check_interval,
            "connection health monitor starting"
        );

        threads.push(self.spawn_health_thread());
        threads.push(self.spawn_flag_thread());
    }

    /// Cancel both schedules and wait for them. No check body executes
    /// after this returns; a recovery that is mid-flight completes first.
    /// Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.trigger();
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("watchdog thread panicked during shutdown");
            }
        }
        debug!("connection health monitor stopped");
    }

    fn spawn_health_thread(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        let coordinator = Arc::clone(&self.coordinator);
        let shutdown = Arc::clone(&self.shutdown);
        let timing = self.timing.clone();

        std::thread::Builder::new()
            .name("watchdog-health".into())
            .spawn(move || {
                if shutdown.wait_for(timing.warmup_delay) {
                    return;
                }
                info!("watchdog timer activated");

                loop {
                    if shutdown.wait_for(timing.check_interval) {
                        return;
                    }
                    run_health_check(&state, &registry, &coordinator, &timing);
                }
            })
            .expect("failed to spawn watchdog health thread")
    }

    fn spawn_flag_thread(&self) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let registry = Arc::clone(&self.registry);
        let coordinator = Arc::clone(&self.coordinator);
        let flags = Arc::clone(&self.flags);
        let shutdown = Arc::clone(&self.shutdown);
        let timing = self.timing.clone();

        std::thread::Builder::new()
            .name("watchdog-flags".into())
            .spawn(move || loop {
                if shutdown.wait_for(timing.flag_poll_interval) {
                    return;
                }

                if flags.take_manual_request() {
                    info!("performing manual reconnect");
                    log_outcome(
                        coordinator.recover(RecoveryRequest::new(RecoverySource::ManualFlag)),
                    );
                }

                flags.write_status(
                    &state.snapshot(),
                    timing.reconnect_threshold,
                    registry.is_connected(),
                );
            })
            .expect("failed to spawn watchdog flag thread")
    }
}

impl Drop for ConnectionHealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One primary check. Blocks through a full recovery on purpose, so the
/// next scheduled tick cannot begin until this one fully resolves.
fn run_health_check(
    state: &Arc<WatchdogState>,
    registry: &Arc<DeviceRegistry>,
    coordinator: &Arc<RecoveryCoordinator>,
    timing: &WatchdogTiming,
) {
    let snapshot = state.snapshot();

    if snapshot.recovering {
        debug!("already reconnecting, skipping check");
        return;
    }

    if snapshot.data_age > timing.reconnect_threshold {
        warn!(
            silent_for = %humantime::format_duration(Duration::from_secs(snapshot.data_age.as_secs())),
            "no data received within threshold, reconnecting scanner"
        );
        log_outcome(coordinator.recover(RecoveryRequest::new(RecoverySource::Timeout)));
        return;
    }

    if !registry.is_connected() {
        warn!("scanner disconnected, attempting to reinitialize");
        log_outcome(coordinator.recover(RecoveryRequest::new(RecoverySource::ConnectionLost)));
    }
}

/// Per-cycle failures end here: logged, never propagated, so one bad cycle
/// can never kill future scheduling.
fn log_outcome(result: crate::error::Result<RecoveryOutcome>) {
    match result {
        Ok(RecoveryOutcome::Recovered) => info!("recovery completed"),
        Ok(RecoveryOutcome::AlreadyInProgress) => debug!("recovery skipped, one already running"),
        Ok(RecoveryOutcome::Escalated) => warn!("recovery escalated to the supervisor"),
        Err(e) => error!(error = %e, "recovery failed"),
    }
}
