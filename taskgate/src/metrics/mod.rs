//! Metrics feed.
//!
//! Every dependency call and every task outcome lands here. The feed keeps
//! constant-memory running statistics per operation plus a bounded window
//! of recent outcomes, which is what adaptive admission and observability
//! read from.

mod feed;
mod stats;

pub use feed::{spawn_snapshot_reporter, MetricsConfig, MetricsFeed};
pub use stats::MetricSnapshot;

/// Metrics operation name under which a caller's task outcomes are recorded.
#[must_use]
pub fn caller_operation(caller_key: &str) -> String {
    format!("caller.{caller_key}")
}
