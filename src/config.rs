//! Service configuration.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `SCANNERD_*` environment overrides. Validation failures are fatal at
//! startup; everything downstream assumes a validated config.

use crate::devices::DeviceKind;
use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Runtime directory for flag files and the status report.
    /// Defaults to the platform-local data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Directory for rolling log files. Console-only logging when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Which hardware family to drive.
    #[serde(default = "default_device_kind")]
    pub kind: DeviceKind,

    /// USB vendor id of the HID reader.
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,

    /// USB product id of the HID reader.
    #[serde(default = "default_product_id")]
    pub product_id: u16,

    /// Serial port of the passport reader.
    #[serde(default = "default_com_port")]
    pub com_port: String,

    /// Substring used to spot the reader in the USB enumeration listing.
    #[serde(default = "default_usb_id_fragment")]
    pub usb_id_fragment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds of data silence before a device is presumed dead.
    #[serde(default = "default_reconnect_threshold_secs")]
    pub reconnect_threshold_secs: u64,

    /// Seconds between liveness checks.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Seconds between manual-flag polls and status report writes.
    #[serde(default = "default_flag_poll_secs")]
    pub flag_poll_secs: u64,

    /// Delay before the first liveness check, covering device warm-up.
    #[serde(default = "default_warmup_delay_secs")]
    pub warmup_delay_secs: u64,

    /// Pause between releasing a dead handle and re-opening the port,
    /// giving the native layer time to settle.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Consecutive failed recoveries before requesting a process restart.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Downstream consumer endpoint, host:port.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Prefix written before each payload on the wire.
    #[serde(default = "default_row_separator")]
    pub row_separator: String,
}

fn default_device_kind() -> DeviceKind {
    DeviceKind::AccessIs
}
fn default_vendor_id() -> u16 {
    0x08ff
}
fn default_product_id() -> u16 {
    0x0009
}
fn default_com_port() -> String {
    if cfg!(windows) { "COM3" } else { "/dev/ttyUSB0" }.to_string()
}
fn default_usb_id_fragment() -> String {
    "VID_08FF".to_string()
}
fn default_reconnect_threshold_secs() -> u64 {
    30
}
fn default_check_interval_secs() -> u64 {
    10
}
fn default_flag_poll_secs() -> u64 {
    5
}
fn default_warmup_delay_secs() -> u64 {
    10
}
fn default_settle_delay_ms() -> u64 {
    2000
}
fn default_escalation_threshold() -> u32 {
    5
}
fn default_endpoint() -> String {
    "127.0.0.1:9100".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_ack_timeout_ms() -> u64 {
    2000
}
fn default_row_separator() -> String {
    "\n".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: default_device_kind(),
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            com_port: default_com_port(),
            usb_id_fragment: default_usb_id_fragment(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            reconnect_threshold_secs: default_reconnect_threshold_secs(),
            check_interval_secs: default_check_interval_secs(),
            flag_poll_secs: default_flag_poll_secs(),
            warmup_delay_secs: default_warmup_delay_secs(),
            settle_delay_ms: default_settle_delay_ms(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_ms: default_connect_timeout_ms(),
            ack_timeout_ms: default_ack_timeout_ms(),
            row_separator: default_row_separator(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            watchdog: WatchdogConfig::default(),
            delivery: DeliveryConfig::default(),
            data_dir: None,
            log_dir: None,
            debug: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from an optional file plus environment overrides.
    ///
    /// A file passed explicitly must exist and parse; with no file given,
    /// `scannerd.toml` in the working directory is picked up when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(p) => builder.add_source(config::File::from(p).required(true)),
            None => builder.add_source(config::File::with_name("scannerd").required(false)),
        };

        let loaded = builder
            .add_source(
                config::Environment::with_prefix("SCANNERD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        let cfg: ServiceConfig = loaded
            .try_deserialize()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.watchdog.reconnect_threshold_secs == 0 {
            return Err(BridgeError::Config(
                "watchdog.reconnect_threshold_secs must be greater than zero".into(),
            ));
        }
        if self.watchdog.check_interval_secs == 0 {
            return Err(BridgeError::Config(
                "watchdog.check_interval_secs must be greater than zero".into(),
            ));
        }
        if self.watchdog.flag_poll_secs == 0 {
            return Err(BridgeError::Config(
                "watchdog.flag_poll_secs must be greater than zero".into(),
            ));
        }
        if self.watchdog.escalation_threshold == 0 {
            return Err(BridgeError::Config(
                "watchdog.escalation_threshold must be greater than zero".into(),
            ));
        }
        if self.delivery.endpoint.is_empty() {
            return Err(BridgeError::Config("delivery.endpoint must be set".into()));
        }
        if self.device.kind == DeviceKind::IdBox && self.device.com_port.is_empty() {
            return Err(BridgeError::Config(
                "device.com_port must be set for the idbox device".into(),
            ));
        }
        Ok(())
    }

    /// Runtime directory for flag files and the status report.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("", "", "scannerd")
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn reconnect_threshold(&self) -> Duration {
        Duration::from_secs(self.watchdog.reconnect_threshold_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.watchdog.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_are_valid() {
        let cfg = ServiceConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.watchdog.escalation_threshold, 5);
        assert_eq!(cfg.watchdog.flag_poll_secs, 5);
    }

    #[test]
    fn zero_threshold_rejected() {
        let mut cfg = ServiceConfig::default();
        cfg.watchdog.reconnect_threshold_secs = 0;
        assert!(matches!(cfg.validate(), Err(BridgeError::Config(_))));
    }

    #[test]
    fn idbox_requires_port() {
        let mut cfg = ServiceConfig::default();
        cfg.device.kind = DeviceKind::IdBox;
        cfg.device.com_port.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    #[serial]
    fn env_override_applies() {
        std::env::set_var("SCANNERD__WATCHDOG__CHECK_INTERVAL_SECS", "17");
        let cfg = ServiceConfig::load(None).unwrap();
        std::env::remove_var("SCANNERD__WATCHDOG__CHECK_INTERVAL_SECS");
        assert_eq!(cfg.watchdog.check_interval_secs, 17);
    }

    #[test]
    fn missing_explicit_file_is_fatal() {
        let result = ServiceConfig::load(Some(Path::new("/nonexistent/scannerd.toml")));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }
}
