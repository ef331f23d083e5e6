//! Sliding time window limiter.

use super::{AdmissionDecision, RateLimiter};
use crate::errors::ConfigError;
use crate::utils::Clock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Sliding window parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Maximum total weight admitted per window.
    pub capacity: u64,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            capacity: 60,
            window_ms: 60_000,
        }
    }
}

impl SlidingWindowConfig {
    /// Creates a window admitting `capacity` weight per `window_ms`.
    #[must_use]
    pub fn new(capacity: u64, window_ms: u64) -> Self {
        Self {
            capacity,
            window_ms,
        }
    }

    /// Checks the parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("admission.capacity", "must be positive"));
        }
        if self.window_ms == 0 {
            return Err(ConfigError::invalid("admission.window_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Time-ordered log of admitted weights.
///
/// An entry recorded at `t` counts against every check made at or before
/// `t + window_ms` and is dropped after that.
#[derive(Debug, Clone, Default)]
pub(crate) struct WindowLog {
    entries: VecDeque<(u64, u64)>,
    total: u64,
    last_seen_ms: u64,
}

impl WindowLog {
    pub(crate) fn prune(&mut self, now_ms: u64, window_ms: u64) {
        let cutoff = now_ms.saturating_sub(window_ms);
        while let Some(&(at, weight)) = self.entries.front() {
            if at >= cutoff {
                break;
            }
            self.total -= weight;
            self.entries.pop_front();
        }
    }

    /// Admits `weight` if the window has room under `capacity`.
    ///
    /// `ceiling` is the largest capacity this key can ever be given; only
    /// weights above it are unsatisfiable. A weight above `capacity` but
    /// within `ceiling` is told to come back after one window.
    pub(crate) fn try_admit(
        &mut self,
        now_ms: u64,
        window_ms: u64,
        capacity: u64,
        ceiling: u64,
        weight: u64,
    ) -> AdmissionDecision {
        self.last_seen_ms = now_ms;
        self.prune(now_ms, window_ms);

        // Capacity can shrink below what is already in the window.
        if weight == 0 {
            return AdmissionDecision::allowed(capacity.saturating_sub(self.total));
        }
        if weight > ceiling.max(capacity) {
            return AdmissionDecision::unsatisfiable();
        }

        if self.total + weight <= capacity {
            self.entries.push_back((now_ms, weight));
            self.total += weight;
            return AdmissionDecision::allowed(capacity - self.total);
        }

        // Walk the oldest entries until enough weight would have expired.
        let must_free = (self.total + weight).saturating_sub(capacity);
        let mut freed = 0;
        let mut retry_after = window_ms;
        for &(at, entry_weight) in &self.entries {
            freed += entry_weight;
            if freed >= must_free {
                retry_after = (at + window_ms + 1).saturating_sub(now_ms);
                break;
            }
        }
        AdmissionDecision::denied(retry_after.max(1), capacity.saturating_sub(self.total))
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }
}

/// Sliding window limiter: at most `capacity` weight in any `window_ms` span.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: SlidingWindowConfig,
    windows: DashMap<String, WindowLog>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: SlidingWindowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    /// Returns the weight currently counted against `key`.
    #[must_use]
    pub fn in_window(&self, key: &str) -> u64 {
        let now = self.clock.now_ms();
        self.windows.get_mut(key).map_or(0, |mut log| {
            log.prune(now, self.config.window_ms);
            log.total()
        })
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn algorithm(&self) -> &'static str {
        "sliding_window"
    }

    fn allow(&self, key: &str, weight: u64) -> AdmissionDecision {
        let now = self.clock.now_ms();
        let SlidingWindowConfig {
            capacity,
            window_ms,
        } = self.config;

        if let Some(mut log) = self.windows.get_mut(key) {
            return log.try_admit(now, window_ms, capacity, capacity, weight);
        }
        self.windows
            .entry(key.to_string())
            .or_default()
            .try_admit(now, window_ms, capacity, capacity, weight)
    }

    fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    fn evict_idle(&self, idle_ms: u64) -> usize {
        let now = self.clock.now_ms();
        let before = self.windows.len();
        self.windows
            .retain(|_, log| now.saturating_sub(log.last_seen_ms()) < idle_ms);
        before - self.windows.len()
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
