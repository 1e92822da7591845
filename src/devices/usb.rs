//! USB enumeration through the platform device lister.
//!
//! The OS view of the bus is one of the health signals the watchdog
//! reconciles: a reader whose handle still answers but which has vanished
//! from enumeration is dead, and vice versa. Enumeration goes through an
//! external command so a hung USB stack cannot wedge the service process.

use std::io;
use std::process::Command;
use tracing::{debug, error, info, warn};

/// Enumeration fragment of the AccessIS reader family.
pub const DEFAULT_SCANNER_ID_FRAGMENT: &str = "VID_08FF";

/// List currently enumerated USB devices, one identifier per entry.
pub fn connected_usb_devices() -> io::Result<Vec<String>> {
    let output = list_command().output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let devices = parse_device_listing(&stdout);
    debug!(count = devices.len(), "USB devices enumerated");
    Ok(devices)
}

#[cfg(windows)]
fn list_command() -> Command {
    let mut cmd = Command::new("wmic");
    cmd.args(["path", "Win32_USBControllerDevice", "get", "Dependent"]);
    cmd
}

#[cfg(not(windows))]
fn list_command() -> Command {
    Command::new("lsusb")
}

/// Keep the device-identifier lines of the lister output, dropping the
/// header and blank padding.
fn parse_device_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case("Dependent"))
        .map(str::to_string)
        .collect()
}

/// True when any USB device is visible at all. A completely empty bus on a
/// kiosk means the hub or the stack is gone, not that nothing is plugged in.
pub fn usb_devices_available() -> bool {
    match connected_usb_devices() {
        Ok(devices) if devices.is_empty() => {
            warn!("no USB devices found");
            false
        }
        Ok(devices) => {
            info!(count = devices.len(), "USB devices present");
            true
        }
        Err(e) => {
            error!(error = %e, "USB enumeration failed");
            false
        }
    }
}

/// True when a device matching the given identifier fragment is enumerated.
pub fn scanner_present(id_fragment: &str) -> bool {
    match connected_usb_devices() {
        Ok(devices) => devices.iter().any(|d| d.contains(id_fragment)),
        Err(e) => {
            error!(error = %e, "USB enumeration failed");
            false
        }
    }
}
