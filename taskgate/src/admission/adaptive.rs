//! Sliding window limiter whose capacity follows caller health.

use super::sliding_window::WindowLog;
use super::{AdmissionDecision, RateLimiter};
use crate::errors::ConfigError;
use crate::metrics::{caller_operation, MetricsFeed};
use crate::utils::Clock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Success rate above which capacity is raised.
pub const RAISE_ABOVE: f64 = 0.95;
/// Success rate below which capacity is lowered.
pub const LOWER_BELOW: f64 = 0.8;

const RAISE_FACTOR: f64 = 1.1;
const LOWER_FACTOR: f64 = 0.9;
const DRIFT_FRACTION: f64 = 0.1;

/// Adaptive limiter parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    /// Capacity per window under normal conditions.
    pub base_capacity: u64,
    /// Admission window length in milliseconds.
    pub window_ms: u64,
    /// Interval between adjustments run by `spawn_adjuster`, in milliseconds.
    #[serde(default = "default_adjustment_interval_ms")]
    pub adjustment_interval_ms: u64,
    /// Look-back used when reading the caller's success rate.
    #[serde(default = "default_success_window_ms")]
    pub success_window_ms: u64,
}

fn default_adjustment_interval_ms() -> u64 {
    30_000
}

fn default_success_window_ms() -> u64 {
    60_000
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_capacity: 60,
            window_ms: 60_000,
            adjustment_interval_ms: default_adjustment_interval_ms(),
            success_window_ms: default_success_window_ms(),
        }
    }
}

impl AdaptiveConfig {
    /// Creates an adaptive window of `base_capacity` per `window_ms`.
    #[must_use]
    pub fn new(base_capacity: u64, window_ms: u64) -> Self {
        Self {
            base_capacity,
            window_ms,
            ..Self::default()
        }
    }

    /// Sets the adjustment interval.
    #[must_use]
    pub fn with_adjustment_interval_ms(mut self, interval_ms: u64) -> Self {
        self.adjustment_interval_ms = interval_ms;
        self
    }

    /// Adjustment interval as a [`Duration`].
    #[must_use]
    pub fn adjustment_interval(&self) -> Duration {
        Duration::from_millis(self.adjustment_interval_ms)
    }

    /// Sets the success-rate look-back.
    #[must_use]
    pub fn with_success_window_ms(mut self, window_ms: u64) -> Self {
        self.success_window_ms = window_ms;
        self
    }

    /// Checks the parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_capacity == 0 {
            return Err(ConfigError::invalid(
                "admission.base_capacity",
                "must be positive",
            ));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::invalid("admission.window_ms", "must be positive"));
        }
        if self.adjustment_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "admission.adjustment_interval_ms",
                "must be positive",
            ));
        }
        if self.success_window_ms == 0 {
            return Err(ConfigError::invalid(
                "admission.success_window_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Computes the next effective capacity.
///
/// The result always lies in `[0.5 * base, 2 * base]`. With no success rate
/// the capacity drifts back toward `base`.
#[must_use]
pub fn adjust_capacity(current: f64, base: f64, success_rate: Option<f64>) -> f64 {
    let next = match success_rate {
        Some(rate) if rate > RAISE_ABOVE => current * RAISE_FACTOR,
        Some(rate) if rate < LOWER_BELOW => current * LOWER_FACTOR,
        _ => current + (base - current) * DRIFT_FRACTION,
    };
    next.clamp(base * 0.5, base * 2.0)
}

#[derive(Debug, Clone)]
struct AdaptiveState {
    effective_capacity: f64,
    window: WindowLog,
}

/// Sliding window limiter with per-key capacity driven by caller success rate.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    config: AdaptiveConfig,
    states: DashMap<String, AdaptiveState>,
    metrics: Arc<MetricsFeed>,
    clock: Arc<dyn Clock>,
}

impl AdaptiveLimiter {
    /// Creates a limiter reading caller outcomes from `metrics`.
    #[must_use]
    pub fn new(config: AdaptiveConfig, metrics: Arc<MetricsFeed>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            states: DashMap::new(),
            metrics,
            clock,
        }
    }

    /// Current effective capacity for `key`; base capacity for unknown keys.
    #[must_use]
    pub fn effective_capacity(&self, key: &str) -> f64 {
        self.states
            .get(key)
            .map_or(self.config.base_capacity as f64, |s| s.effective_capacity)
    }

    fn admit_capacity(effective: f64) -> u64 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let floored = effective.floor().max(1.0) as u64;
        floored
    }
}

impl RateLimiter for AdaptiveLimiter {
    fn algorithm(&self) -> &'static str {
        "adaptive"
    }

    fn allow(&self, key: &str, weight: u64) -> AdmissionDecision {
        let now = self.clock.now_ms();
        let base = self.config.base_capacity as f64;
        let window_ms = self.config.window_ms;

        let mut state = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| AdaptiveState {
                effective_capacity: base,
                window: WindowLog::default(),
            });
        let capacity = Self::admit_capacity(state.effective_capacity);
        let ceiling = Self::admit_capacity(base * 2.0);
        state.window.try_admit(now, window_ms, capacity, ceiling, weight)
    }

    fn reset(&self, key: &str) {
        self.states.remove(key);
    }

    fn evict_idle(&self, idle_ms: u64) -> usize {
        let now = self.clock.now_ms();
        let before = self.states.len();
        self.states
            .retain(|_, s| now.saturating_sub(s.window.last_seen_ms()) < idle_ms);
        before - self.states.len()
    }

    fn tracked_keys(&self) -> usize {
        self.states.len()
    }

    fn adjustment_interval(&self) -> Option<Duration> {
        Some(self.config.adjustment_interval())
    }

    fn tick(&self) {
        let base = self.config.base_capacity as f64;
        for mut entry in self.states.iter_mut() {
            let success_rate = self
                .metrics
                .rolling_success_rate(&caller_operation(entry.key()), self.config.success_window_ms);
            let previous = entry.effective_capacity;
            let next = adjust_capacity(previous, base, success_rate);
            entry.effective_capacity = next;
            debug!(
                caller_key = %entry.key(),
                ?success_rate,
                previous,
                next,
                "Adjusted admission capacity"
            );
        }
    }
}
