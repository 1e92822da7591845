//! Sleep inhibition while the service holds a device.
//!
//! Kiosk machines that doze drop their USB ports, which the watchdog then
//! has to recover from; cheaper to keep the machine awake for the lifetime
//! of the service. The guard clears the request on drop.

use tracing::info;

pub struct KeepAwake {
    active: bool,
}

impl KeepAwake {
    #[cfg(windows)]
    pub fn acquire() -> Self {
        use tracing::warn;
        use winapi::um::winbase::SetThreadExecutionState;
        use winapi::um::winnt::{ES_CONTINUOUS, ES_DISPLAY_REQUIRED, ES_SYSTEM_REQUIRED};

        let previous = unsafe {
            SetThreadExecutionState(ES_CONTINUOUS | ES_SYSTEM_REQUIRED | ES_DISPLAY_REQUIRED)
        };

        if previous == 0 {
            warn!("failed to set power request, system may sleep and drop the reader");
            Self { active: false }
        } else {
            info!("power request set, system will stay awake while the reader is active");
            Self { active: true }
        }
    }

    #[cfg(not(windows))]
    pub fn acquire() -> Self {
        info!("sleep inhibition not supported on this platform, skipping");
        Self { active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for KeepAwake {
    fn drop(&mut self) {
        #[cfg(windows)]
        if self.active {
            use winapi::um::winbase::SetThreadExecutionState;
            use winapi::um::winnt::ES_CONTINUOUS;

            unsafe {
                SetThreadExecutionState(ES_CONTINUOUS);
            }
            info!("power request cleared, system may sleep");
        }
    }
}
