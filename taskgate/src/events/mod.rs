//! Outbound observability channel.
//!
//! Components never talk to a concrete transport. They write to an
//! [`EventSink`], which may log, collect for tests, or forward through a
//! bounded queue.

mod backpressure;
mod sink;

pub use backpressure::{BackpressureAwareEventSink, BackpressureMetrics};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use std::sync::Arc;

/// Event type names emitted by the core.
pub mod types {
    /// A circuit moved between states.
    pub const CIRCUIT_STATE_CHANGED: &str = "circuit.state_changed";
    /// Periodic per-operation metrics snapshot.
    pub const METRICS_SNAPSHOT: &str = "metrics.snapshot";
    /// A caller was denied admission.
    pub const ADMISSION_DENIED: &str = "admission.denied";
    /// A stage invocation started.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage produced output satisfying its contract.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage produced output violating its contract.
    pub const STAGE_INVALID: &str = "stage.invalid";
    /// A stage invocation failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage is being re-invoked.
    pub const STAGE_RETRY: &str = "stage.retry";
    /// A task reached its terminal result.
    pub const TASK_COMPLETED: &str = "task.completed";
}

/// Returns a sink that discards everything.
#[must_use]
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpEventSink)
}
