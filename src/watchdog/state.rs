//! Shared liveness state.
//!
//! One mutex guards the liveness clock, the attempt counter and the
//! recovery gate, so a check never sees a torn combination of them. The
//! data callback, both watchdog schedules and the recovery path all go
//! through this type.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

struct LivenessState {
    last_data: Instant,
    last_data_at: DateTime<Utc>,
    attempts: u32,
    recovering: bool,
}

/// Point-in-time view of the liveness state for checks and status reports.
#[derive(Debug, Clone)]
pub struct LivenessSnapshot {
    pub data_age: Duration,
    pub last_data_at: DateTime<Utc>,
    pub attempts: u32,
    pub recovering: bool,
}

pub struct WatchdogState {
    inner: Mutex<LivenessState>,
}

impl WatchdogState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LivenessState {
                last_data: Instant::now(),
                last_data_at: Utc::now(),
                attempts: 0,
                recovering: false,
            }),
        }
    }

    /// Record a payload arrival: fresh clock, attempt counter back to zero.
    /// Safe from any thread, never fails.
    pub fn notify_data_received(&self) {
        let mut state = self.inner.lock().unwrap();
        state.last_data = Instant::now();
        state.last_data_at = Utc::now();
        state.attempts = 0;
        debug!("data received notification registered");
    }

    pub fn snapshot(&self) -> LivenessSnapshot {
        let state = self.inner.lock().unwrap();
        LivenessSnapshot {
            data_age: state.last_data.elapsed(),
            last_data_at: state.last_data_at,
            attempts: state.attempts,
            recovering: state.recovering,
        }
    }

    /// Take the recovery gate. Returns `None` when a recovery is already in
    /// flight; the caller must then skip, not queue. The returned guard
    /// releases the gate and resets the liveness clock on every exit path.
    pub fn try_begin_recovery(self: &Arc<Self>) -> Option<RecoveryGuard> {
        let mut state = self.inner.lock().unwrap();
        if state.recovering {
            return None;
        }
        state.recovering = true;
        Some(RecoveryGuard {
            state: Arc::clone(self),
        })
    }

    /// Bump the attempt counter and return its new value.
    pub fn record_attempt(&self) -> u32 {
        let mut state = self.inner.lock().unwrap();
        state.attempts += 1;
        state.attempts
    }

    pub fn reset_attempts(&self) {
        self.inner.lock().unwrap().attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    pub fn is_recovering(&self) -> bool {
        self.inner.lock().unwrap().recovering
    }

    fn finish_recovery(&self) {
        let mut state = self.inner.lock().unwrap();
        state.recovering = false;
        // Start a fresh silence window after every attempt, successful or
        // not, so the next check does not re-trigger immediately.
        state.last_data = Instant::now();
        state.last_data_at = Utc::now();
    }
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the recovery gate for the duration of one recovery sequence.
pub struct RecoveryGuard {
    state: Arc<WatchdogState>,
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.state.finish_recovery();
    }
}
