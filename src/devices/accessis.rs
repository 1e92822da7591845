//! AccessIS magnetic-stripe / MRZ reader adapter.
//!
//! The reader is a USB HID device that pushes swipe and MRZ reads as input
//! reports. A background thread drains reports and hands assembled text to
//! the registered callback. Liveness is probed through HID enumeration,
//! independent of the read loop.

use super::{DataCallback, DeviceAdapter, DeviceKind};
use crate::config::DeviceConfig;
use crate::error::{BridgeError, Result};
use hidapi::{HidApi, HidDevice};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Read timeout per poll; bounds how long disconnect waits on the reader.
const READ_TIMEOUT_MS: i32 = 500;

/// Consecutive read failures after which the handle is considered dead and
/// the reader parks. The watchdog notices the resulting data silence.
const MAX_READ_ERRORS: u32 = 3;

pub struct AccessIsDevice {
    vendor_id: u16,
    product_id: u16,
    callback: Option<DataCallback>,
    api: Option<Mutex<HidApi>>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl AccessIsDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            callback: None,
            api: None,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn spawn_reader(&mut self, device: HidDevice) {
        let callback = self.callback.clone();
        let stop = Arc::clone(&self.stop);

        let handle = std::thread::Builder::new()
            .name("accessis-reader".into())
            .spawn(move || {
                let mut buf = [0u8; 256];
                let mut read_errors = 0u32;

                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    match device.read_timeout(&mut buf, READ_TIMEOUT_MS) {
                        Ok(0) => continue,
                        Ok(len) => {
                            read_errors = 0;
                            if let Some(text) = report_text(&buf[..len]) {
                                debug!(bytes = len, "reader report received");
                                match &callback {
                                    Some(cb) => cb(text),
                                    None => warn!("payload dropped, no data callback registered"),
                                }
                            }
                        }
                        Err(e) => {
                            read_errors += 1;
                            warn!(error = %e, consecutive = read_errors, "reader read failed");
                            if read_errors >= MAX_READ_ERRORS {
                                warn!("closing reader handle after repeated read failures");
                                break;
                            }
                        }
                    }
                }
            })
            .expect("failed to spawn accessis reader thread");

        self.reader = Some(handle);
    }

    fn stop_reader(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("accessis reader thread panicked");
            }
        }
    }
}

impl DeviceAdapter for AccessIsDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::AccessIs
    }

    fn set_data_callback(&mut self, callback: DataCallback) {
        self.callback = Some(callback);
    }

    fn connect(&mut self) -> Result<()> {
        if self.callback.is_none() {
            warn!("connecting without a data callback, payloads will be dropped");
        }

        let api = HidApi::new()
            .map_err(|e| BridgeError::TransientHardware(format!("hidapi init: {e}")))?;

        let device = api.open(self.vendor_id, self.product_id).map_err(|e| {
            BridgeError::ConnectFailed(format!(
                "open {:04x}:{:04x}: {e}",
                self.vendor_id, self.product_id
            ))
        })?;

        let product = device
            .get_product_string()
            .ok()
            .flatten()
            .unwrap_or_else(|| "unknown".to_string());
        let id = format!("{:04x}:{:04x}", self.vendor_id, self.product_id);
        info!(product = %product, id = %id, "AccessIS reader connected");

        self.stop.store(false, Ordering::SeqCst);
        self.spawn_reader(device);
        self.api = Some(Mutex::new(api));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.stop_reader();
        self.api = None;
        debug!("AccessIS reader released");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let Some(api) = &self.api else {
            return false;
        };
        let Ok(mut api) = api.lock() else {
            return false;
        };
        if let Err(e) = api.refresh_devices() {
            warn!(error = %e, "HID enumeration refresh failed");
            return false;
        }
        let connected = api
            .device_list()
            .any(|d| d.vendor_id() == self.vendor_id && d.product_id() == self.product_id);
        connected
    }
}

impl Drop for AccessIsDevice {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Extract the textual payload of one input report. Reports are padded with
/// trailing NULs; an all-padding report carries no swipe and is skipped.
fn report_text(report: &[u8]) -> Option<String> {
    let trimmed = match report.iter().rposition(|&b| b != 0) {
        Some(last) => &report[..=last],
        None => return None,
    };
    let text = String::from_utf8_lossy(trimmed).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
