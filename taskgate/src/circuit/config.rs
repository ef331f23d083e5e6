//! Circuit breaker configuration.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thresholds and timeouts for one circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Rolling error rate, in `(0, 1]`, that opens the circuit.
    pub error_rate_threshold: f64,
    /// Outcomes required in the rolling log before the circuit may open.
    pub volume_threshold: usize,
    /// Number of recent outcomes kept for the error rate.
    pub window_size: usize,
    /// Time an open circuit waits before allowing a trial call.
    pub recovery_timeout_ms: u64,
    /// Deadline applied to every wrapped call.
    pub call_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            error_rate_threshold: 0.5,
            volume_threshold: 5,
            window_size: 20,
            recovery_timeout_ms: 30_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the consecutive failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the error rate threshold.
    #[must_use]
    pub fn with_error_rate_threshold(mut self, threshold: f64) -> Self {
        self.error_rate_threshold = threshold;
        self
    }

    /// Sets the minimum volume.
    #[must_use]
    pub fn with_volume_threshold(mut self, threshold: usize) -> Self {
        self.volume_threshold = threshold;
        self
    }

    /// Sets the rolling log size.
    #[must_use]
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Sets the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.recovery_timeout_ms = timeout_ms;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_call_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.call_timeout_ms = timeout_ms;
        self
    }

    /// Per-call timeout as a [`Duration`].
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Checks the thresholds are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit.failure_threshold",
                "must be positive",
            ));
        }
        if !(self.error_rate_threshold > 0.0 && self.error_rate_threshold <= 1.0) {
            return Err(ConfigError::invalid(
                "circuit.error_rate_threshold",
                "must be within (0, 1]",
            ));
        }
        if self.volume_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit.volume_threshold",
                "must be positive",
            ));
        }
        if self.window_size < self.volume_threshold {
            return Err(ConfigError::invalid(
                "circuit.window_size",
                format!(
                    "must be at least volume_threshold ({})",
                    self.volume_threshold
                ),
            ));
        }
        if self.recovery_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit.recovery_timeout_ms",
                "must be positive",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "circuit.call_timeout_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let base = CircuitBreakerConfig::new();
        assert!(base.clone().with_failure_threshold(0).validate().is_err());
        assert!(base.clone().with_error_rate_threshold(1.5).validate().is_err());
        assert!(base.clone().with_error_rate_threshold(0.0).validate().is_err());
        assert!(base.clone().with_call_timeout_ms(0).validate().is_err());
        assert!(base.clone().with_recovery_timeout_ms(0).validate().is_err());
    }

    #[test]
    fn test_window_must_cover_volume() {
        let config = CircuitBreakerConfig::new()
            .with_volume_threshold(10)
            .with_window_size(5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("circuit.window_size"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 3}"#).unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.window_size, 20);
    }
}
