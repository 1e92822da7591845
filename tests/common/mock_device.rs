//! Mock device infrastructure for watchdog testing.
//!
//! A [`MockHub`] is shared by every device a test creates, whether built
//! directly or through the injected factory, so tests can script connect
//! outcomes and count hardware interactions across recovery cycles.

use scanner_bridge::config::ServiceConfig;
use scanner_bridge::devices::{DataCallback, DeviceAdapter, DeviceKind};
use scanner_bridge::error::{BridgeError, Result};
use scanner_bridge::watchdog::DeviceFactory;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockHub {
    /// Devices built through the factory.
    created: AtomicU32,
    connect_calls: AtomicU32,
    disconnect_calls: AtomicU32,
    /// Scripted connect outcomes, consumed front to back; when empty,
    /// `default_connect_ok` applies.
    connect_script: Mutex<VecDeque<bool>>,
    default_connect_ok: AtomicBool,
    fail_disconnects: AtomicBool,
    connect_delay: Mutex<Duration>,
    /// Callback registered on the most recently wired device.
    callback: Mutex<Option<DataCallback>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicU32::new(0),
            connect_calls: AtomicU32::new(0),
            disconnect_calls: AtomicU32::new(0),
            connect_script: Mutex::new(VecDeque::new()),
            default_connect_ok: AtomicBool::new(true),
            fail_disconnects: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            callback: Mutex::new(None),
        })
    }

    pub fn fail_all_connects(&self) {
        self.default_connect_ok.store(false, Ordering::SeqCst);
    }

    pub fn fail_all_disconnects(&self) {
        self.fail_disconnects.store(true, Ordering::SeqCst);
    }

    pub fn script_connects(&self, outcomes: &[bool]) {
        self.connect_script
            .lock()
            .unwrap()
            .extend(outcomes.iter().copied());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Push a payload through the most recently registered data callback,
    /// as the hardware would.
    pub fn emit(&self, payload: &str) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(cb) = callback {
            cb(payload.to_string());
        }
    }

    /// Factory handed to the recovery coordinator.
    pub fn factory(self: &Arc<Self>) -> DeviceFactory {
        let hub = Arc::clone(self);
        Box::new(move |_config: &ServiceConfig| {
            hub.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MockDevice::new(Arc::clone(&hub), false)) as Box<dyn DeviceAdapter>)
        })
    }

    /// A device that is already connected, for seeding the registry.
    pub fn connected_device(self: &Arc<Self>) -> Box<dyn DeviceAdapter> {
        Box::new(MockDevice::new(Arc::clone(self), true))
    }

    fn next_connect_ok(&self) -> bool {
        if let Some(outcome) = self.connect_script.lock().unwrap().pop_front() {
            return outcome;
        }
        self.default_connect_ok.load(Ordering::SeqCst)
    }
}

pub struct MockDevice {
    hub: Arc<MockHub>,
    connected: bool,
}

impl MockDevice {
    fn new(hub: Arc<MockHub>, connected: bool) -> Self {
        Self { hub, connected }
    }
}

impl DeviceAdapter for MockDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::AccessIs
    }

    fn set_data_callback(&mut self, callback: DataCallback) {
        *self.hub.callback.lock().unwrap() = Some(callback);
    }

    fn connect(&mut self) -> Result<()> {
        self.hub.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.hub.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if self.hub.next_connect_ok() {
            self.connected = true;
            Ok(())
        } else {
            Err(BridgeError::ConnectFailed("mock device refused".into()))
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.hub.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        if self.hub.fail_disconnects.load(Ordering::SeqCst) {
            return Err(BridgeError::TransientHardware(
                "mock disconnect wedged".into(),
            ));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
