//! Observability utilities.

mod tracing;

pub use tracing::{init_tracing, task_span, LogFormat, SpanTimer, DEFAULT_FILTER};
