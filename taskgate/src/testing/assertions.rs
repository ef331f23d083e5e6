//! Test assertions for terminal results and events.

use crate::events::CollectingEventSink;
use crate::pipeline::{TerminalResult, TerminalStatus};

/// Asserts that the task completed.
pub fn assert_completed(result: &TerminalResult) {
    assert_eq!(
        result.status,
        TerminalStatus::Completed,
        "Expected completed, got {} (error: {:?})",
        result.status,
        result.error
    );
}

/// Asserts that the task ended with `expected`.
pub fn assert_status(result: &TerminalResult, expected: TerminalStatus) {
    assert_eq!(
        result.status, expected,
        "Expected status {}, got {} (error: {:?})",
        expected, result.status, result.error
    );
}

/// Asserts the accepted stage outputs, by name, in order.
pub fn assert_stage_order(result: &TerminalResult, expected: &[&str]) {
    let actual: Vec<&str> = result
        .stage_outputs
        .iter()
        .map(|r| r.stage.as_str())
        .collect();
    assert_eq!(actual, expected, "Unexpected stage outputs");
}

/// Asserts that the task's error mentions `needle`.
pub fn assert_error_contains(result: &TerminalResult, needle: &str) {
    let error = result.error.as_deref().unwrap_or_default();
    assert!(
        error.contains(needle),
        "Expected error containing '{needle}', got {:?}",
        result.error
    );
}

/// Asserts that `sink` saw exactly `count` events of `event_type`.
pub fn assert_event_count(sink: &CollectingEventSink, event_type: &str, count: usize) {
    let actual = sink.payloads_of(event_type).len();
    assert_eq!(
        actual, count,
        "Expected {count} '{event_type}' events, got {actual}"
    );
}
