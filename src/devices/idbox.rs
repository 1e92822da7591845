//! IDBox passport reader adapter.
//!
//! The reader speaks a line protocol over UART. Units in the field are
//! split between 9600 and 115200 baud firmware, so connecting probes the
//! slow rate first and falls back. MRZ frames end with a blank line
//! (`\r\n\r\n`); the terminator is stripped before the callback fires.

use super::{DataCallback, DeviceAdapter, DeviceKind};
use crate::config::DeviceConfig;
use crate::error::{BridgeError, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const BAUD_RATES: [u32; 2] = [9600, 115_200];
const PROBE_TIMEOUT: Duration = Duration::from_millis(750);
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const FRAME_TERMINATOR: &[u8] = b"\r\n\r\n";
const VERSION_REQUEST: &[u8] = b"V\r";
const MAX_READ_ERRORS: u32 = 3;

pub struct IdBoxDevice {
    port_name: String,
    callback: Option<DataCallback>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
}

impl IdBoxDevice {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            port_name: config.com_port.clone(),
            callback: None,
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the port and confirm a live reader with a version probe.
    /// A reader that answers nothing at this rate gets the port closed
    /// again so the next rate starts clean.
    fn open_and_probe(&self, baud: u32) -> Result<Box<dyn SerialPort>> {
        let mut port = serialport::new(self.port_name.as_str(), baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PROBE_TIMEOUT)
            .open()
            .map_err(|e| {
                BridgeError::ConnectFailed(format!("open {} at {baud}: {e}", self.port_name))
            })?;

        port.write_all(VERSION_REQUEST)
            .and_then(|_| port.flush())
            .map_err(|e| BridgeError::TransientHardware(format!("version probe write: {e}")))?;

        let mut response = [0u8; 64];
        match port.read(&mut response) {
            Ok(n) if n > 0 => {
                debug!(baud, "version probe answered");
                Ok(port)
            }
            Ok(_) => Err(BridgeError::ConnectFailed(format!(
                "no version response at {baud} baud"
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(BridgeError::ConnectFailed(
                format!("version probe timed out at {baud} baud"),
            )),
            Err(e) => Err(BridgeError::TransientHardware(format!(
                "version probe read: {e}"
            ))),
        }
    }

    fn spawn_reader(&mut self, mut port: Box<dyn SerialPort>) {
        let callback = self.callback.clone();
        let stop = Arc::clone(&self.stop);
        let connected = Arc::clone(&self.connected);

        if let Err(e) = port.set_timeout(READ_TIMEOUT) {
            warn!(error = %e, "failed to set continuous read timeout");
        }

        let handle = std::thread::Builder::new()
            .name("idbox-reader".into())
            .spawn(move || {
                let mut pending: Vec<u8> = Vec::new();
                let mut chunk = [0u8; 256];
                let mut read_errors = 0u32;

                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    match port.read(&mut chunk) {
                        Ok(0) => continue,
                        Ok(n) => {
                            read_errors = 0;
                            pending.extend_from_slice(&chunk[..n]);
                            for frame in split_frames(&mut pending) {
                                debug!(len = frame.len(), "MRZ frame received");
                                match &callback {
                                    Some(cb) => cb(frame),
                                    None => warn!("frame dropped, no data callback registered"),
                                }
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            read_errors += 1;
                            warn!(error = %e, consecutive = read_errors, "serial read failed");
                            if read_errors >= MAX_READ_ERRORS {
                                warn!("closing serial handle after repeated read failures");
                                break;
                            }
                        }
                    }
                }

                connected.store(false, Ordering::SeqCst);
            })
            .expect("failed to spawn idbox reader thread");

        self.reader = Some(handle);
    }

    fn stop_reader(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("idbox reader thread panicked");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl DeviceAdapter for IdBoxDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::IdBox
    }

    fn set_data_callback(&mut self, callback: DataCallback) {
        self.callback = Some(callback);
    }

    fn connect(&mut self) -> Result<()> {
        let mut last_err = None;
        for baud in BAUD_RATES {
            match self.open_and_probe(baud) {
                Ok(port) => {
                    info!(port = %self.port_name, baud, "IDBox reader connected");
                    self.stop.store(false, Ordering::SeqCst);
                    self.connected.store(true, Ordering::SeqCst);
                    self.spawn_reader(port);
                    return Ok(());
                }
                Err(e) => {
                    debug!(baud, error = %e, "baud probe failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            BridgeError::ConnectFailed(format!("no reader on {}", self.port_name))
        }))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.stop_reader();
        debug!("IDBox reader released");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        match serialport::available_ports() {
            Ok(ports) => ports.iter().any(|p| p.port_name == self.port_name),
            Err(e) => {
                warn!(error = %e, "serial enumeration failed");
                false
            }
        }
    }
}

impl Drop for IdBoxDevice {
    fn drop(&mut self) {
        self.stop_reader();
    }
}

/// Drain complete frames out of the pending buffer, stripping the blank
/// line terminator. Incomplete trailing data stays buffered.
fn split_frames(pending: &mut Vec<u8>) -> Vec<String> {
    let mut frames = Vec::new();

    while let Some(pos) = pending
        .windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
    {
        let frame: Vec<u8> = pending.drain(..pos + FRAME_TERMINATOR.len()).collect();
        let text = String::from_utf8_lossy(&frame[..pos]).trim().to_string();
        if !text.is_empty() {
            frames.push(text);
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_terminator_is_stripped() {
        let mut pending = b"P<UTOERIKSSON<<ANNA\r\n\r\n".to_vec();
        let frames = split_frames(&mut pending);
        assert_eq!(frames, vec!["P<UTOERIKSSON<<ANNA".to_string()]);
        assert!(pending.is_empty());
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut pending = b"P<UTO".to_vec();
        assert!(split_frames(&mut pending).is_empty());
        assert_eq!(pending, b"P<UTO");

        pending.extend_from_slice(b"X\r\n\r\nP<NEXT");
        let frames = split_frames(&mut pending);
        assert_eq!(frames, vec!["P<UTOX".to_string()]);
        assert_eq!(pending, b"P<NEXT");
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut pending = b"AAA\r\n\r\nBBB\r\n\r\n".to_vec();
        let frames = split_frames(&mut pending);
        assert_eq!(frames, vec!["AAA".to_string(), "BBB".to_string()]);
    }

    #[test]
    fn disconnected_adapter_probes_false() {
        let device = IdBoxDevice::new(&DeviceConfig::default());
        assert!(!device.is_connected());
    }
}
