//! Assertions over recorded alerts.

use super::mocks::RecordingAlertSink;

/// Assert that exactly these alerts were emitted, in order.
///
/// # Panics
///
/// Panics with the recorded events when the names differ.
pub fn assert_alerts(sink: &RecordingAlertSink, expected: &[&str]) {
    let names = sink.names();
    assert_eq!(
        names,
        expected,
        "Unexpected alert sequence.\nEvents: {:?}",
        sink.events()
    );
}

/// Assert that an alert was never emitted.
///
/// # Panics
///
/// Panics when `name` was recorded.
pub fn assert_no_alert(sink: &RecordingAlertSink, name: &str) {
    assert!(
        !sink.names().contains(&name),
        "Expected no '{}' alert, got: {:?}",
        name,
        sink.events()
    );
}
