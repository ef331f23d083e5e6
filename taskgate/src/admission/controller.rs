//! Admission controller: configuration-selected limiter plus logging.

use super::{
    AdaptiveConfig, AdaptiveLimiter, AdmissionDecision, RateLimiter, SlidingWindowConfig,
    SlidingWindowLimiter, TokenBucketConfig, TokenBucketLimiter,
};
use crate::errors::ConfigError;
use crate::events::{noop_sink, types, EventSink};
use crate::metrics::MetricsFeed;
use crate::utils::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Which admission algorithm to run, with its parameters.
///
/// Deserializes from a JSON object tagged by `algorithm`, e.g.
/// `{"algorithm": "token_bucket", "capacity": 10, "refill_tokens": 1.0, "refill_interval_ms": 1000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AdmissionConfig {
    /// Burst-tolerant token bucket.
    TokenBucket(TokenBucketConfig),
    /// Fixed-capacity sliding window.
    SlidingWindow(SlidingWindowConfig),
    /// Sliding window whose capacity follows caller success rate.
    Adaptive(AdaptiveConfig),
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self::TokenBucket(TokenBucketConfig::default())
    }
}

impl AdmissionConfig {
    /// Checks the selected algorithm's parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::TokenBucket(config) => config.validate(),
            Self::SlidingWindow(config) => config.validate(),
            Self::Adaptive(config) => config.validate(),
        }
    }

    /// Algorithm name as it appears in configuration.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::TokenBucket(_) => "token_bucket",
            Self::SlidingWindow(_) => "sliding_window",
            Self::Adaptive(_) => "adaptive",
        }
    }
}

/// Per-caller throttling front door.
///
/// Wraps a [`RateLimiter`] chosen from [`AdmissionConfig`]. Decisions are
/// synchronous and never fail; denials are logged and reported to the
/// event sink.
pub struct AdmissionController {
    limiter: Arc<dyn RateLimiter>,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Builds a controller from configuration.
    ///
    /// `metrics` is only read by the adaptive algorithm.
    #[must_use]
    pub fn from_config(
        config: &AdmissionConfig,
        metrics: Arc<MetricsFeed>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter: Arc<dyn RateLimiter> = match config {
            AdmissionConfig::TokenBucket(cfg) => {
                Arc::new(TokenBucketLimiter::new(cfg.clone(), clock))
            }
            AdmissionConfig::SlidingWindow(cfg) => {
                Arc::new(SlidingWindowLimiter::new(cfg.clone(), clock))
            }
            AdmissionConfig::Adaptive(cfg) => {
                Arc::new(AdaptiveLimiter::new(cfg.clone(), metrics, clock))
            }
        };
        Self::with_limiter(limiter)
    }

    /// Wraps an existing limiter.
    #[must_use]
    pub fn with_limiter(limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            event_sink: noop_sink(),
        }
    }

    /// Sets the sink that receives `admission.denied` events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Decides whether `caller_key` may spend `weight` units now.
    pub fn allow(&self, caller_key: &str, weight: u64) -> AdmissionDecision {
        let decision = self.limiter.allow(caller_key, weight);
        if decision.allowed {
            return decision;
        }

        match decision.retry_after_ms {
            Some(retry_after_ms) => debug!(
                caller_key,
                weight,
                retry_after_ms,
                algorithm = self.limiter.algorithm(),
                "Admission denied"
            ),
            None => warn!(
                caller_key,
                weight,
                algorithm = self.limiter.algorithm(),
                "Admission denied: weight exceeds capacity"
            ),
        }
        self.event_sink.try_emit(
            types::ADMISSION_DENIED,
            Some(serde_json::json!({
                "caller_key": caller_key,
                "weight": weight,
                "retry_after_ms": decision.retry_after_ms,
                "algorithm": self.limiter.algorithm(),
            })),
        );
        decision
    }

    /// Shorthand for a unit-weight check.
    pub fn allow_one(&self, caller_key: &str) -> AdmissionDecision {
        self.allow(caller_key, 1)
    }

    /// Runs one adjustment pass. No-op for non-adaptive algorithms.
    pub fn tick(&self) {
        self.limiter.tick();
    }

    /// How often [`tick`](Self::tick) should run, if the algorithm adjusts.
    #[must_use]
    pub fn adjustment_interval(&self) -> Option<Duration> {
        self.limiter.adjustment_interval()
    }

    /// Forgets all state for `caller_key`.
    pub fn reset(&self, caller_key: &str) {
        self.limiter.reset(caller_key);
    }

    /// Drops callers idle for at least `idle_ms`.
    pub fn evict_idle(&self, idle_ms: u64) -> usize {
        let evicted = self.limiter.evict_idle(idle_ms);
        if evicted > 0 {
            debug!(evicted, idle_ms, "Evicted idle admission keys");
        }
        evicted
    }

    /// Number of callers currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.limiter.tracked_keys()
    }

    /// The active algorithm's name.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        self.limiter.algorithm()
    }
}

/// Calls [`AdmissionController::tick`] every configured adjustment interval
/// until the handle is aborted.
///
/// Returns `None` without spawning when the algorithm never adjusts.
pub fn spawn_adjuster(controller: Arc<AdmissionController>) -> Option<JoinHandle<()>> {
    let interval = controller.adjustment_interval()?;
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            controller.tick();
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::metrics::{caller_operation, MetricsConfig};
    use crate::utils::ManualClock;
    use pretty_assertions::assert_eq;

    fn controller(config: &AdmissionConfig) -> (AdmissionController, Arc<MetricsFeed>, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let metrics = Arc::new(MetricsFeed::with_clock(MetricsConfig::default(), clock.clone()));
        let controller = AdmissionController::from_config(config, metrics.clone(), clock.clone());
        (controller, metrics, clock)
    }

    #[test]
    fn test_config_deserializes_tagged_algorithm() {
        let config: AdmissionConfig = serde_json::from_str(
            r#"{"algorithm": "sliding_window", "capacity": 5, "window_ms": 1000}"#,
        )
        .unwrap();
        assert_eq!(config, AdmissionConfig::SlidingWindow(SlidingWindowConfig::new(5, 1_000)));

        let adaptive: AdmissionConfig =
            serde_json::from_str(r#"{"algorithm": "adaptive", "base_capacity": 8, "window_ms": 500}"#)
                .unwrap();
        assert_eq!(adaptive.algorithm(), "adaptive");
        assert!(adaptive.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_unknown_algorithm() {
        let result: Result<AdmissionConfig, _> =
            serde_json::from_str(r#"{"algorithm": "leaky_bucket", "capacity": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config_selects_algorithm() {
        for config in [
            AdmissionConfig::TokenBucket(TokenBucketConfig::default()),
            AdmissionConfig::SlidingWindow(SlidingWindowConfig::default()),
            AdmissionConfig::Adaptive(AdaptiveConfig::default()),
        ] {
            let (controller, _, _) = controller(&config);
            assert_eq!(controller.algorithm(), config.algorithm());
        }
    }

    #[test]
    fn test_denial_emits_event() {
        let sink = Arc::new(CollectingEventSink::new());
        let (controller, _, _) =
            controller(&AdmissionConfig::TokenBucket(TokenBucketConfig::new(1, 1.0, 100)));
        let controller = controller.with_event_sink(sink.clone());

        assert!(controller.allow_one("caller").allowed);
        let denied = controller.allow_one("caller");
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_ms, Some(100));

        let payloads = sink.payloads_of(types::ADMISSION_DENIED);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["caller_key"], "caller");
        assert_eq!(payloads[0]["retry_after_ms"], 100);
    }

    #[test]
    fn test_unsatisfiable_weight_has_no_retry_hint() {
        let (controller, _, _) =
            controller(&AdmissionConfig::SlidingWindow(SlidingWindowConfig::new(2, 100)));
        let decision = controller.allow("caller", 3);
        assert!(!decision.allowed);
        assert!(decision.retry_after_ms.is_none());
    }

    #[test]
    fn test_tick_adjusts_adaptive_capacity() {
        let (controller, metrics, _) =
            controller(&AdmissionConfig::Adaptive(AdaptiveConfig::new(2, 1_000)));
        assert!(controller.allow_one("c").allowed);
        assert!(controller.allow_one("c").allowed);
        assert!(!controller.allow_one("c").allowed);

        for _ in 0..10 {
            metrics.record(&caller_operation("c"), 1.0, true, &[]);
        }
        // 2 -> 2.2 -> 2.42 -> 2.662 -> 2.9282 -> 3.22; floor reaches 3.
        for _ in 0..5 {
            controller.tick();
        }
        assert!(controller.allow_one("c").allowed);
    }

    #[test]
    fn test_reset_and_evict() {
        let (controller, _, clock) =
            controller(&AdmissionConfig::TokenBucket(TokenBucketConfig::new(1, 1.0, 10_000)));
        controller.allow_one("a");
        assert!(!controller.allow_one("a").allowed);
        controller.reset("a");
        assert!(controller.allow_one("a").allowed);

        clock.advance(60_000);
        controller.allow_one("b");
        assert_eq!(controller.evict_idle(30_000), 1);
        assert_eq!(controller.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_adjuster_ticks_periodically() {
        let clock = ManualClock::shared();
        let metrics = Arc::new(MetricsFeed::with_clock(MetricsConfig::default(), clock.clone()));
        let limiter = Arc::new(AdaptiveLimiter::new(
            AdaptiveConfig::new(10, 1_000).with_adjustment_interval_ms(100),
            metrics.clone(),
            clock,
        ));
        let controller = Arc::new(AdmissionController::with_limiter(limiter.clone()));
        controller.allow_one("c");
        metrics.record(&caller_operation("c"), 1.0, true, &[]);

        let handle = spawn_adjuster(controller).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!((limiter.effective_capacity("c") - 10.0).abs() < 1e-9);

        // Two adjustments: 10 -> 11 -> 12.1.
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();
        assert!((limiter.effective_capacity("c") - 12.1).abs() < 1e-9);
    }

    #[test]
    fn test_spawn_adjuster_skips_fixed_algorithms() {
        let (controller, _, _) =
            controller(&AdmissionConfig::TokenBucket(TokenBucketConfig::default()));
        assert!(controller.adjustment_interval().is_none());
        assert!(spawn_adjuster(Arc::new(controller)).is_none());
    }
}
