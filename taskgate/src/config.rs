//! Top-level configuration.
//!
//! One JSON document configures every component:
//!
//! ```json
//! {
//!   "admission": {"algorithm": "sliding_window", "capacity": 60, "window_ms": 60000},
//!   "circuit": {"failure_threshold": 3, "recovery_timeout_ms": 10000},
//!   "metrics": {"window_capacity": 200},
//!   "pipeline": {"default_max_retries": 1}
//! }
//! ```
//!
//! Missing sections and fields take their defaults.

use crate::admission::AdmissionConfig;
use crate::circuit::CircuitBreakerConfig;
use crate::errors::ConfigError;
use crate::metrics::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pipeline-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Contract retries for stages without their own bound.
    pub default_max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 1,
        }
    }
}

impl PipelineConfig {
    /// Creates the default pipeline config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default contract retry bound.
    #[must_use]
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }
}

/// Configuration for the whole gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskgateConfig {
    /// Admission algorithm and parameters.
    pub admission: AdmissionConfig,
    /// Default circuit breaker parameters.
    pub circuit: CircuitBreakerConfig,
    /// Metrics feed parameters.
    pub metrics: MetricsConfig,
    /// Pipeline settings.
    pub pipeline: PipelineConfig,
}

impl TaskgateConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the admission section.
    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    /// Sets the circuit section.
    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Sets the metrics section.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    /// Sets the pipeline section.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.admission.validate()?;
        self.circuit.validate()?;
        if self.metrics.window_capacity == 0 {
            return Err(ConfigError::invalid("metrics.window_capacity", "must be positive"));
        }
        if self.metrics.snapshot_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "metrics.snapshot_interval_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::SlidingWindowConfig;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TaskgateConfig::default();
        assert_eq!(config.pipeline.default_max_retries, 1);
        assert_eq!(config.admission.algorithm(), "token_bucket");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config = TaskgateConfig::from_json_str(
            r#"{
                "admission": {"algorithm": "sliding_window", "capacity": 5, "window_ms": 1000},
                "circuit": {"failure_threshold": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(
            config.admission,
            AdmissionConfig::SlidingWindow(SlidingWindowConfig::new(5, 1000))
        );
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.window_size, CircuitBreakerConfig::default().window_size);
        assert_eq!(config.metrics, MetricsConfig::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = TaskgateConfig::from_json_str(r#"{"circuit": {"error_rate_threshold": 1.5}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = TaskgateConfig::new()
            .with_metrics(MetricsConfig::new().with_window_capacity(0))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("metrics.window_capacity"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = TaskgateConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"pipeline": {{"default_max_retries": 3}}}}"#).unwrap();

        let config = TaskgateConfig::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline, PipelineConfig::new().with_default_max_retries(3));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TaskgateConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
