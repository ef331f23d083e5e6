//! Fixed-capacity token bucket.

use super::{AdmissionDecision, RateLimiter};
use crate::errors::ConfigError;
use crate::utils::Clock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Tolerance for float accumulation when comparing token counts.
const EPSILON: f64 = 1e-9;

/// Token bucket parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Maximum burst size.
    pub capacity: u64,
    /// Tokens added every `refill_interval_ms`.
    pub refill_tokens: f64,
    /// Refill period in milliseconds.
    pub refill_interval_ms: u64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_tokens: 1.0,
            refill_interval_ms: 1_000,
        }
    }
}

impl TokenBucketConfig {
    /// Creates a bucket of `capacity` refilling `refill_tokens` every `refill_interval_ms`.
    #[must_use]
    pub fn new(capacity: u64, refill_tokens: f64, refill_interval_ms: u64) -> Self {
        Self {
            capacity,
            refill_tokens,
            refill_interval_ms,
        }
    }

    /// Refill rate in tokens per millisecond.
    #[must_use]
    pub fn refill_per_ms(&self) -> f64 {
        if self.refill_interval_ms == 0 {
            0.0
        } else {
            self.refill_tokens / self.refill_interval_ms as f64
        }
    }

    /// Checks the parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("admission.capacity", "must be positive"));
        }
        if !self.refill_tokens.is_finite() || self.refill_tokens <= 0.0 {
            return Err(ConfigError::invalid(
                "admission.refill_tokens",
                "must be a positive number",
            ));
        }
        if self.refill_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "admission.refill_interval_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: f64,
    last_refill_ms: u64,
}

impl BucketState {
    fn refill(&mut self, now_ms: u64, rate: f64, capacity: f64) {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed > 0 {
            self.tokens = (self.tokens + elapsed as f64 * rate).min(capacity);
            self.last_refill_ms = now_ms;
        }
    }
}

/// Token bucket limiter: bursts up to `capacity`, sustained rate `refill_per_ms`.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    buckets: DashMap<String, BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(config: TokenBucketConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            clock,
        }
    }

    /// Returns the current token count for `key` after refilling, if tracked.
    #[must_use]
    pub fn tokens(&self, key: &str) -> Option<f64> {
        let now = self.clock.now_ms();
        let capacity = self.config.capacity as f64;
        let rate = self.config.refill_per_ms();
        self.buckets.get_mut(key).map(|mut state| {
            state.refill(now, rate, capacity);
            state.tokens
        })
    }

    fn decide(&self, state: &mut BucketState, now: u64, weight: u64) -> AdmissionDecision {
        let capacity = self.config.capacity as f64;
        let rate = self.config.refill_per_ms();

        // Refill first so a request arriving exactly on a refill boundary sees the new token.
        state.refill(now, rate, capacity);

        let weight = weight as f64;
        if state.tokens + EPSILON >= weight {
            state.tokens = (state.tokens - weight).max(0.0);
            return AdmissionDecision::allowed(floor_u64(state.tokens + EPSILON));
        }

        let remaining = floor_u64(state.tokens + EPSILON);
        if rate <= 0.0 {
            return AdmissionDecision::unsatisfiable();
        }
        let deficit = weight - state.tokens;
        let retry_after = (deficit / rate - EPSILON).ceil().max(1.0);
        AdmissionDecision::denied(floor_u64(retry_after), remaining)
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn algorithm(&self) -> &'static str {
        "token_bucket"
    }

    fn allow(&self, key: &str, weight: u64) -> AdmissionDecision {
        if weight > self.config.capacity {
            return AdmissionDecision::unsatisfiable();
        }
        let now = self.clock.now_ms();

        if let Some(mut state) = self.buckets.get_mut(key) {
            return self.decide(&mut state, now, weight);
        }

        let mut state = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState {
                tokens: self.config.capacity as f64,
                last_refill_ms: now,
            });
        self.decide(&mut state, now, weight)
    }

    fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    fn evict_idle(&self, idle_ms: u64) -> usize {
        let now = self.clock.now_ms();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, state| now.saturating_sub(state.last_refill_ms) < idle_ms);
        before - self.buckets.len()
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn floor_u64(value: f64) -> u64 {
    if value <= 0.0 {
        0
    } else {
        value.floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ManualClock;

    fn limiter(capacity: u64, tokens: f64, interval_ms: u64) -> (TokenBucketLimiter, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let limiter = TokenBucketLimiter::new(
            TokenBucketConfig::new(capacity, tokens, interval_ms),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_burst_up_to_capacity_then_deny() {
        let (limiter, _clock) = limiter(5, 1.0, 1_000);
        for expected_remaining in (0..5).rev() {
            let decision = limiter.allow("k", 1);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, Some(expected_remaining));
        }
        let denied = limiter.allow("k", 1);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_ms, Some(1_000));
    }

    #[test]
    fn test_refill_scenario_two_per_hundred_ms() {
        // Capacity 2, refilling one token every 100ms; requests at t=0,1,2ms.
        let (limiter, clock) = limiter(2, 1.0, 100);

        assert!(limiter.allow("K", 1).allowed);
        clock.set(1);
        assert!(limiter.allow("K", 1).allowed);
        clock.set(2);
        let third = limiter.allow("K", 1);
        assert!(!third.allowed);
        assert_eq!(third.retry_after_ms, Some(98));
    }

    #[test]
    fn test_request_on_refill_boundary_succeeds() {
        let (limiter, clock) = limiter(1, 1.0, 100);
        assert!(limiter.allow("k", 1).allowed);
        assert!(!limiter.allow("k", 1).allowed);

        clock.advance(100);
        assert!(limiter.allow("k", 1).allowed);
    }

    #[test]
    fn test_tokens_never_exceed_capacity() {
        let (limiter, clock) = limiter(3, 1.0, 10);
        limiter.allow("k", 1);
        clock.advance(10_000);
        assert!(limiter.tokens("k").unwrap() <= 3.0);

        for _ in 0..3 {
            assert!(limiter.allow("k", 1).allowed);
        }
        assert!(!limiter.allow("k", 1).allowed);
    }

    #[test]
    fn test_weighted_requests() {
        let (limiter, _clock) = limiter(10, 1.0, 100);
        assert!(limiter.allow("k", 7).allowed);
        let denied = limiter.allow("k", 5);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, Some(3));
        assert_eq!(denied.retry_after_ms, Some(200));
        assert!(limiter.allow("k", 3).allowed);
    }

    #[test]
    fn test_weight_above_capacity_is_unsatisfiable() {
        let (limiter, _clock) = limiter(2, 1.0, 100);
        let decision = limiter.allow("k", 3);
        assert_eq!(decision, AdmissionDecision::unsatisfiable());
    }

    #[test]
    fn test_zero_weight_always_allowed() {
        let (limiter, _clock) = limiter(1, 1.0, 100);
        assert!(limiter.allow("k", 1).allowed);
        assert!(limiter.allow("k", 0).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = limiter(1, 1.0, 100);
        assert!(limiter.allow("a", 1).allowed);
        assert!(limiter.allow("b", 1).allowed);
        assert!(!limiter.allow("a", 1).allowed);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_reset_and_evict() {
        let (limiter, clock) = limiter(1, 1.0, 100);
        limiter.allow("a", 1);
        limiter.reset("a");
        assert!(limiter.allow("a", 1).allowed);

        limiter.allow("b", 1);
        clock.advance(500);
        limiter.allow("b", 0);
        assert_eq!(limiter.evict_idle(200), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(TokenBucketConfig::default().validate().is_ok());
        assert!(TokenBucketConfig::new(0, 1.0, 100).validate().is_err());
        assert!(TokenBucketConfig::new(1, 0.0, 100).validate().is_err());
        assert!(TokenBucketConfig::new(1, 1.0, 0).validate().is_err());
    }

    #[test]
    fn test_capacity_never_exceeded_consecutively() {
        for capacity in 1..20 {
            let (limiter, _clock) = limiter(capacity, 1.0, 1_000);
            let accepted = (0..capacity * 2).filter(|_| limiter.allow("k", 1).allowed).count();
            assert_eq!(accepted as u64, capacity);
        }
    }
}
