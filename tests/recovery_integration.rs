//! Recovery coordinator behavior over mock hardware.

mod common;

use common::{build_harness, MockHub};
use scanner_bridge::error::BridgeError;
use scanner_bridge::watchdog::{RecoveryOutcome, RecoveryRequest, RecoverySource};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn timeout_request() -> RecoveryRequest {
    RecoveryRequest::new(RecoverySource::Timeout)
}

#[test]
fn successful_recovery_installs_fresh_handle() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    let harness = build_harness(&hub, dir.path());

    harness.registry.install(hub.connected_device());
    harness.state.record_attempt();

    let outcome = harness.coordinator.recover(timeout_request()).unwrap();

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(hub.created(), 1);
    assert_eq!(hub.connect_calls(), 1);
    assert_eq!(hub.disconnect_calls(), 1);
    assert!(harness.registry.is_connected());
    assert_eq!(harness.state.snapshot().attempts, 0);
    assert!(!harness.state.is_recovering());
}

#[test]
fn recovery_proceeds_past_failed_release() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    let harness = build_harness(&hub, dir.path());

    hub.fail_all_disconnects();
    harness.registry.install(hub.connected_device());

    let outcome = harness.coordinator.recover(timeout_request()).unwrap();

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(hub.disconnect_calls(), 1);
    assert!(harness.registry.is_connected());
}

#[test]
fn second_trigger_during_recovery_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    hub.set_connect_delay(Duration::from_millis(300));
    let harness = build_harness(&hub, dir.path());

    let slow = Arc::clone(&harness.coordinator);
    let first = std::thread::spawn(move || slow.recover(timeout_request()).unwrap());

    // let the first recovery take the gate and park inside connect
    std::thread::sleep(Duration::from_millis(100));
    let second = harness
        .coordinator
        .recover(RecoveryRequest::new(RecoverySource::ManualFlag))
        .unwrap();

    assert_eq!(second, RecoveryOutcome::AlreadyInProgress);
    assert_eq!(first.join().unwrap(), RecoveryOutcome::Recovered);

    // only the first trigger touched the hardware
    assert_eq!(hub.created(), 1);
    assert_eq!(hub.connect_calls(), 1);
}

#[test]
fn failed_connect_leaves_attempt_counted_and_clock_fresh() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    hub.fail_all_connects();
    let harness = build_harness(&hub, dir.path());

    std::thread::sleep(Duration::from_millis(30));
    let result = harness.coordinator.recover(timeout_request());

    assert!(matches!(result, Err(BridgeError::ConnectFailed(_))));
    let snap = harness.state.snapshot();
    assert_eq!(snap.attempts, 1);
    // the clock restarts on every attempt so the next check waits a full window
    assert!(snap.data_age < Duration::from_millis(30));
    assert!(!harness.state.is_recovering());
    // primary plus the leak-tolerant fallback
    assert_eq!(hub.created(), 2);
    assert_eq!(hub.connect_calls(), 2);
}

#[test]
fn fallback_rescues_a_failed_primary_attempt() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    hub.script_connects(&[false, true]);
    let harness = build_harness(&hub, dir.path());

    let outcome = harness.coordinator.recover(timeout_request()).unwrap();

    assert_eq!(outcome, RecoveryOutcome::Recovered);
    assert_eq!(hub.created(), 2);
    assert_eq!(hub.connect_calls(), 2);
    assert!(harness.registry.is_connected());
    assert_eq!(harness.state.snapshot().attempts, 0);
}

#[test]
fn fifth_consecutive_failure_escalates_without_touching_hardware() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    hub.fail_all_connects();
    let harness = build_harness(&hub, dir.path());

    for attempt in 1..=4 {
        let result = harness.coordinator.recover(timeout_request());
        assert!(
            matches!(result, Err(BridgeError::ConnectFailed(_))),
            "attempt {attempt} should fail to connect"
        );
        assert_eq!(harness.state.snapshot().attempts, attempt);
    }
    let hardware_touches = hub.connect_calls();
    assert!(!harness.flags.restart_required_path().exists());

    let fifth = harness.coordinator.recover(timeout_request()).unwrap();

    assert_eq!(fifth, RecoveryOutcome::Escalated);
    assert!(harness.flags.restart_required_path().exists());
    // no sixth teardown/create cycle ran
    assert_eq!(hub.connect_calls(), hardware_touches);
    // the counter restarts so a slow supervisor is not re-signalled each cycle
    assert_eq!(harness.state.snapshot().attempts, 0);

    let stamp = std::fs::read_to_string(harness.flags.restart_required_path()).unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(stamp.trim()).is_ok());
}

#[test]
fn data_receipt_between_failures_defuses_escalation() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    hub.fail_all_connects();
    let harness = build_harness(&hub, dir.path());

    for _ in 0..4 {
        let _ = harness.coordinator.recover(timeout_request());
    }
    assert_eq!(harness.state.snapshot().attempts, 4);

    // the reader comes back on its own
    harness.state.notify_data_received();
    assert_eq!(harness.state.snapshot().attempts, 0);

    // the next failure is attempt one again, far from the threshold
    let _ = harness.coordinator.recover(timeout_request());
    assert_eq!(harness.state.snapshot().attempts, 1);
    assert!(!harness.flags.restart_required_path().exists());
}

#[test]
fn recovered_device_callback_feeds_liveness_clock() {
    let dir = TempDir::new().unwrap();
    let hub = MockHub::new();
    let harness = build_harness(&hub, dir.path());

    harness.coordinator.recover(timeout_request()).unwrap();

    harness.state.record_attempt();
    hub.emit("P<UTOERIKSSON<<ANNA");

    let snap = harness.state.snapshot();
    assert_eq!(snap.attempts, 0);
    assert!(snap.data_age < Duration::from_millis(100));
}
