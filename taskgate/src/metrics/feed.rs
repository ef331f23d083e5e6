//! Process-wide recorder of call outcomes.

use super::stats::{MetricSnapshot, OperationStats, OutcomeWindow};
use crate::events::{types, EventSink};
use crate::utils::{Clock, SystemClock};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Configuration for the metrics feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Number of recent outcomes kept per operation for rate calculations.
    pub window_capacity: usize,
    /// Interval between published snapshots, in milliseconds.
    pub snapshot_interval_ms: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 200,
            snapshot_interval_ms: 60_000,
        }
    }
}

impl MetricsConfig {
    /// Creates the default metrics config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the outcome window capacity.
    #[must_use]
    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    /// Sets the snapshot interval.
    #[must_use]
    pub fn with_snapshot_interval_ms(mut self, interval_ms: u64) -> Self {
        self.snapshot_interval_ms = interval_ms;
        self
    }

    /// Snapshot interval as a [`Duration`].
    #[must_use]
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

#[derive(Debug)]
struct OperationEntry {
    stats: OperationStats,
    window: OutcomeWindow,
}

/// Records outcomes keyed by logical operation name.
///
/// Each operation has its own lock, so contention is limited to concurrent
/// writers of the same operation. Recording never fails.
#[derive(Debug)]
pub struct MetricsFeed {
    operations: DashMap<String, Mutex<OperationEntry>>,
    total_samples: AtomicU64,
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
}

impl Default for MetricsFeed {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsFeed {
    /// Creates a feed driven by the system clock.
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a feed driven by the given clock.
    #[must_use]
    pub fn with_clock(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            operations: DashMap::new(),
            total_samples: AtomicU64::new(0),
            config,
            clock,
        }
    }

    /// Returns the feed's configuration.
    #[must_use]
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Returns the feed's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Records one outcome.
    ///
    /// Non-finite or negative durations are recorded as zero.
    pub fn record(&self, operation: &str, duration_ms: f64, success: bool, tags: &[(&str, &str)]) {
        let duration_ms = if duration_ms.is_finite() && duration_ms >= 0.0 {
            duration_ms
        } else {
            0.0
        };
        let now = self.clock.now_ms();

        if let Some(entry) = self.operations.get(operation) {
            let mut entry = entry.lock();
            entry.stats.observe(duration_ms, success, now);
            entry.window.push(now, success);
        } else {
            let capacity = self.config.window_capacity;
            let slot = self
                .operations
                .entry(operation.to_string())
                .or_insert_with(|| {
                    Mutex::new(OperationEntry {
                        stats: OperationStats::default(),
                        window: OutcomeWindow::new(capacity),
                    })
                });
            let mut entry = slot.lock();
            entry.stats.observe(duration_ms, success, now);
            entry.window.push(now, success);
        }

        self.total_samples.fetch_add(1, Ordering::Relaxed);
        trace!(operation, duration_ms, success, ?tags, "Recorded outcome");
    }

    /// Returns the statistics for one operation.
    #[must_use]
    pub fn snapshot(&self, operation: &str) -> Option<MetricSnapshot> {
        self.operations
            .get(operation)
            .map(|entry| entry.lock().stats.snapshot(operation))
    }

    /// Returns every operation's statistics, sorted by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        let mut all: Vec<_> = self
            .operations
            .iter()
            .map(|entry| entry.value().lock().stats.snapshot(entry.key()))
            .collect();
        all.sort_by(|a, b| a.operation.cmp(&b.operation));
        all
    }

    /// Returns the known operation names.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<_> = self.operations.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Fraction of failed outcomes in the last `window_ms`, in `[0, 1]`.
    ///
    /// Returns 0.0 when nothing was recorded in the window.
    #[must_use]
    pub fn rolling_error_rate(&self, operation: &str, window_ms: u64) -> f64 {
        match self.window_counts(operation, window_ms) {
            Some((total, failures)) if total > 0 => failures as f64 / total as f64,
            _ => 0.0,
        }
    }

    /// Fraction of successful outcomes in the last `window_ms`.
    ///
    /// Returns `None` when nothing was recorded in the window.
    #[must_use]
    pub fn rolling_success_rate(&self, operation: &str, window_ms: u64) -> Option<f64> {
        match self.window_counts(operation, window_ms) {
            Some((total, failures)) if total > 0 => Some((total - failures) as f64 / total as f64),
            _ => None,
        }
    }

    fn window_counts(&self, operation: &str, window_ms: u64) -> Option<(usize, usize)> {
        let since = self.clock.now_ms().saturating_sub(window_ms);
        self.operations
            .get(operation)
            .map(|entry| entry.lock().window.counts_since(since))
    }

    /// Total samples recorded across all operations.
    #[must_use]
    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    /// Forgets one operation.
    pub fn reset(&self, operation: &str) {
        self.operations.remove(operation);
    }

    /// Forgets every operation.
    pub fn clear(&self) {
        self.operations.clear();
        self.total_samples.store(0, Ordering::Relaxed);
    }

    /// Emits one snapshot event per operation to `sink`.
    pub fn publish_snapshots(&self, sink: &dyn EventSink) {
        for snapshot in self.snapshots() {
            match serde_json::to_value(&snapshot) {
                Ok(payload) => sink.try_emit(types::METRICS_SNAPSHOT, Some(payload)),
                Err(err) => {
                    tracing::warn!(operation = %snapshot.operation, error = %err, "Failed to serialize snapshot");
                }
            }
        }
    }
}

/// Publishes snapshots from `feed` to `sink` every configured
/// `snapshot_interval_ms`.
///
/// The returned handle can be aborted to stop reporting.
pub fn spawn_snapshot_reporter(
    feed: Arc<MetricsFeed>,
    sink: Arc<dyn EventSink>,
) -> JoinHandle<()> {
    let interval = feed.config().snapshot_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            feed.publish_snapshots(sink.as_ref());
        }
    })
}
