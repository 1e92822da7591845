// Shared across test binaries; not every binary uses every helper.
#![allow(dead_code)]

pub mod mock_device;

use scanner_bridge::config::ServiceConfig;
use scanner_bridge::registry::DeviceRegistry;
use scanner_bridge::watchdog::{FlagChannel, RecoveryCoordinator, WatchdogState};
use std::path::Path;
use std::sync::Arc;

pub use mock_device::MockHub;

/// Config for watchdog tests: flag files under a temp dir, settle delay
/// shrunk so recovery cycles complete in milliseconds.
pub fn test_config(data_dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.data_dir = Some(data_dir.to_path_buf());
    config.watchdog.settle_delay_ms = 10;
    config
}

pub struct Harness {
    pub config: Arc<ServiceConfig>,
    pub state: Arc<WatchdogState>,
    pub registry: Arc<DeviceRegistry>,
    pub flags: Arc<FlagChannel>,
    pub coordinator: Arc<RecoveryCoordinator>,
}

/// Wire a coordinator over mock hardware. The data callback feeds the
/// liveness clock exactly as the service pipeline does.
pub fn build_harness(hub: &Arc<MockHub>, data_dir: &Path) -> Harness {
    let config = Arc::new(test_config(data_dir));
    let state = Arc::new(WatchdogState::new());
    let registry = Arc::new(DeviceRegistry::new());
    let flags = Arc::new(FlagChannel::new(config.data_dir()));

    let callback_state = Arc::clone(&state);
    let coordinator = Arc::new(RecoveryCoordinator::new(
        Arc::clone(&config),
        Arc::clone(&state),
        Arc::clone(&registry),
        Arc::clone(&flags),
        Arc::new(move |_payload| callback_state.notify_data_received()),
        hub.factory(),
    ));

    Harness {
        config,
        state,
        registry,
        flags,
        coordinator,
    }
}
