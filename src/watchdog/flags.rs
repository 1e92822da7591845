//! Flag files: the out-of-band operator channel.
//!
//! Three files live under the runtime data directory:
//!
//! - `reconnect.flag`: written by an operator or tool to force one
//!   recovery cycle; consumed (deleted) before recovery starts.
//! - `status.txt`: overwritten each reporting cycle with the current
//!   liveness state; read by monitoring and by `scannerd status`.
//! - `restart_required.flag`: written when recovery escalates; an
//!   external supervisor restarts the process and may leave
//!   `restart_occurred.flag` behind as an acknowledgment.

use crate::watchdog::state::LivenessSnapshot;
use chrono::{DateTime, Local, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const RECONNECT_FLAG: &str = "reconnect.flag";
pub const STATUS_FILE: &str = "status.txt";
pub const RESTART_REQUIRED_FLAG: &str = "restart_required.flag";
pub const RESTART_OCCURRED_FLAG: &str = "restart_occurred.flag";

pub struct FlagChannel {
    data_dir: PathBuf,
}

impl FlagChannel {
    /// Create the channel over the given runtime directory. The directory
    /// is created eagerly; failure to create it is logged and the channel
    /// degrades to no-ops rather than failing service start.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = fs::create_dir_all(&data_dir) {
            error!(dir = %data_dir.display(), error = %e, "failed to create runtime directory");
        }
        Self { data_dir }
    }

    pub fn reconnect_flag_path(&self) -> PathBuf {
        self.data_dir.join(RECONNECT_FLAG)
    }

    pub fn status_file_path(&self) -> PathBuf {
        self.data_dir.join(STATUS_FILE)
    }

    pub fn restart_required_path(&self) -> PathBuf {
        self.data_dir.join(RESTART_REQUIRED_FLAG)
    }

    /// Check for a manual recovery request and consume it.
    ///
    /// The sentinel is removed before recovery runs so one write triggers
    /// exactly one cycle. When removal fails the request is left in place
    /// and this poll reports nothing; the next poll retries.
    pub fn take_manual_request(&self) -> bool {
        let path = self.reconnect_flag_path();
        if !path.exists() {
            return false;
        }

        info!("manual reconnect flag detected");
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to consume reconnect flag, retrying next poll");
                false
            }
        }
    }

    /// Ask an operator-side process for a recovery cycle.
    pub fn request_manual_recovery(&self) -> io::Result<()> {
        fs::write(self.reconnect_flag_path(), Utc::now().to_rfc3339())
    }

    /// Signal the external supervisor that in-process recovery has given
    /// up and the whole service needs a restart.
    pub fn write_restart_request(&self) -> io::Result<()> {
        fs::write(self.restart_required_path(), Utc::now().to_rfc3339())
    }

    /// Consume the supervisor's restart acknowledgment, if one was left
    /// behind. Called once at startup; failures are swallowed.
    pub fn consume_restart_acknowledgment(&self) {
        let path = self.data_dir.join(RESTART_OCCURRED_FLAG);
        if !path.exists() {
            return;
        }
        match fs::read_to_string(&path) {
            Ok(stamp) => info!(restarted_at = %stamp.trim(), "service was restarted by the supervisor"),
            Err(e) => warn!(error = %e, "unreadable restart acknowledgment"),
        }
        let _ = fs::remove_file(&path);
    }

    /// Overwrite the status report. Best-effort observability with no
    /// bearing on control flow; all errors are swallowed.
    pub fn write_status(&self, snapshot: &LivenessSnapshot, threshold: Duration, connected: bool) {
        let now = Local::now();
        let last_data: DateTime<Local> = snapshot.last_data_at.into();
        let status = format!(
            "Last Data: {}\r\nCurrent Time: {}\r\nTime Since Last Data: {:.1} seconds\r\n\
             Reconnect Threshold: {} seconds\r\nReconnect Attempts: {}\r\nScanner Connected: {}",
            last_data.format("%Y-%m-%d %H:%M:%S"),
            now.format("%Y-%m-%d %H:%M:%S"),
            snapshot.data_age.as_secs_f64(),
            threshold.as_secs(),
            snapshot.attempts,
            connected,
        );

        let _ = fs::write(self.status_file_path(), status);
    }

    /// Read the current status report, if the service has written one.
    pub fn read_status(data_dir: &Path) -> Option<String> {
        fs::read_to_string(data_dir.join(STATUS_FILE)).ok()
    }
}
