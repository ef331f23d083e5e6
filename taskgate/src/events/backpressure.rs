//! Bounded, non-blocking event delivery.

use super::EventSink;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Counters describing how the queue is coping with load.
#[derive(Debug, Default)]
pub struct BackpressureMetrics {
    queued: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    last_drop: RwLock<Option<Instant>>,
}

impl BackpressureMetrics {
    fn record_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        *self.last_drop.write() = Some(Instant::now());
    }

    /// Returns the number of events accepted into the queue.
    #[must_use]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Returns the number of events handed to the downstream sink.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of dropped events.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns when the last event was dropped, if ever.
    #[must_use]
    pub fn last_drop(&self) -> Option<Instant> {
        *self.last_drop.read()
    }

    /// Returns the drop rate as a percentage of all offered events.
    #[must_use]
    pub fn drop_rate(&self) -> f64 {
        let queued = self.queued();
        let dropped = self.dropped();
        let total = queued + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Converts metrics to a JSON value.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "queued": self.queued(),
            "delivered": self.delivered(),
            "dropped": self.dropped(),
            "drop_rate_percent": (self.drop_rate() * 100.0).round() / 100.0
        })
    }
}

struct EventMessage {
    event_type: String,
    data: Option<serde_json::Value>,
}

/// An event sink that hands events to a worker task through a bounded queue.
///
/// `try_emit` never waits: when the queue is full the event is dropped and
/// counted. This keeps circuit breakers and the pipeline runner independent
/// of how slow the downstream transport is.
pub struct BackpressureAwareEventSink {
    tx: mpsc::Sender<EventMessage>,
    capacity: usize,
    metrics: Arc<BackpressureMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackpressureAwareEventSink {
    /// Creates the sink and spawns its delivery worker.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(downstream: Arc<dyn EventSink>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, mut rx) = mpsc::channel::<EventMessage>(capacity);
        let metrics = Arc::new(BackpressureMetrics::default());

        let worker_metrics = Arc::clone(&metrics);
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                downstream.emit(&msg.event_type, msg.data).await;
                worker_metrics.record_delivered();
            }
        });

        Arc::new(Self {
            tx,
            capacity,
            metrics,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Returns the number of events waiting for delivery.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Returns the delivery metrics.
    #[must_use]
    pub fn metrics(&self) -> &BackpressureMetrics {
        &self.metrics
    }

    /// Waits until every queued event has been delivered or `timeout` passes.
    ///
    /// Returns true if the queue fully drained.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.metrics.delivered() < self.metrics.queued() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        true
    }

    /// Stops the delivery worker. Undelivered events are discarded.
    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for BackpressureAwareEventSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl EventSink for BackpressureAwareEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let msg = EventMessage {
            event_type: event_type.to_string(),
            data,
        };
        if self.tx.send(msg).await.is_ok() {
            self.metrics.record_queued();
        } else {
            self.metrics.record_drop();
        }
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let msg = EventMessage {
            event_type: event_type.to_string(),
            data,
        };
        match self.tx.try_send(msg) {
            Ok(()) => self.metrics.record_queued(),
            Err(_) => {
                self.metrics.record_drop();
                warn!(
                    event_type = %event_type,
                    queue_size = self.queue_size(),
                    dropped_total = self.metrics.dropped(),
                    "Event dropped due to backpressure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    #[test]
    fn test_metrics_default() {
        let metrics = BackpressureMetrics::default();
        assert_eq!(metrics.queued(), 0);
        assert_eq!(metrics.dropped(), 0);
        assert!(metrics.drop_rate().abs() < f64::EPSILON);
        assert!(metrics.last_drop().is_none());
    }

    #[test]
    fn test_metrics_drop_rate() {
        let metrics = BackpressureMetrics::default();
        metrics.record_queued();
        metrics.record_queued();
        metrics.record_drop();

        assert!((metrics.drop_rate() - 33.333).abs() < 0.01);
        assert_eq!(metrics.to_dict()["dropped"], 1);
    }

    #[tokio::test]
    async fn test_events_are_delivered_downstream() {
        let downstream = Arc::new(CollectingEventSink::new());
        let sink = BackpressureAwareEventSink::spawn(downstream.clone(), 16);

        sink.try_emit("circuit.state_changed", Some(serde_json::json!({"to": "open"})));
        sink.emit("metrics.snapshot", None).await;

        assert!(sink.flush(Duration::from_secs(1)).await);
        assert_eq!(downstream.len(), 2);
        assert_eq!(sink.metrics().delivered(), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_instead_of_blocking() {
        let downstream = Arc::new(CollectingEventSink::new());
        let sink = BackpressureAwareEventSink::spawn(downstream.clone(), 2);

        // The worker cannot run until we yield, so the third event overflows.
        sink.try_emit("a", None);
        sink.try_emit("b", None);
        sink.try_emit("c", None);

        assert_eq!(sink.metrics().queued(), 2);
        assert_eq!(sink.metrics().dropped(), 1);

        assert!(sink.flush(Duration::from_secs(1)).await);
        assert_eq!(downstream.len(), 2);
    }
}
