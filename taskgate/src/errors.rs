//! Error types for taskgate.
//!
//! Admission denials and contract violations are ordinary outcomes and are
//! not represented here. These types cover what can actually go wrong:
//! invalid configuration, unavailable dependencies, timeouts and pipelines
//! that cannot be built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for taskgate operations.
#[derive(Debug, Error)]
pub enum TaskgateError {
    /// A pipeline definition was rejected.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A circuit is open and no fallback was supplied.
    #[error("Dependency '{dependency}' unavailable, retry after {retry_after_ms}ms")]
    DependencyUnavailable {
        /// The dependency name.
        dependency: String,
        /// Milliseconds until the circuit allows a trial call.
        retry_after_ms: u64,
    },

    /// A dependency exceeded its deadline.
    #[error("Dependency '{dependency}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The dependency name.
        dependency: String,
        /// The enforced timeout.
        timeout_ms: u64,
    },

    /// Stage output did not satisfy its contract.
    #[error("Stage '{stage}' violated its contract: {}", reasons.join("; "))]
    ContractViolation {
        /// The stage name.
        stage: String,
        /// Individual violations.
        reasons: Vec<String>,
    },

    /// A stage executor reported an error.
    #[error("Stage execution error: {0}")]
    StageExecution(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field has an unusable value.
    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Metadata about a pipeline definition error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., `"PIPELINE-002-DUPLICATE"`).
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Pipeline definition error codes.
pub mod codes {
    /// The pipeline has no stages.
    pub const EMPTY: &str = "PIPELINE-001-EMPTY";
    /// Two stages share a name.
    pub const DUPLICATE: &str = "PIPELINE-002-DUPLICATE";
    /// The synthesis stage is missing, repeated or not last.
    pub const SYNTHESIS: &str = "PIPELINE-003-SYNTHESIS";
    /// A guard retry policy is inconsistent with the stage order.
    pub const GUARD_RETRY: &str = "PIPELINE-004-GUARD_RETRY";
}

/// Error raised when a pipeline definition is rejected.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional structured error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new(codes::DUPLICATE, "Duplicate stage")
            .with_fix_hint("Rename one of the stages")
            .with_context_entry("stage", "produce");

        assert_eq!(info.code, "PIPELINE-002-DUPLICATE");
        assert_eq!(info.fix_hint.as_deref(), Some("Rename one of the stages"));
        assert_eq!(info.context.get("stage").map(String::as_str), Some("produce"));
    }

    #[test]
    fn test_pipeline_validation_error_code() {
        let err = PipelineValidationError::new("no stages")
            .with_error_info(ContractErrorInfo::new(codes::EMPTY, "Empty pipeline"));
        assert_eq!(err.code(), Some(codes::EMPTY));
        assert_eq!(err.to_string(), "no stages");
    }

    #[test]
    fn test_contract_violation_display() {
        let err = TaskgateError::ContractViolation {
            stage: "classify".to_string(),
            reasons: vec!["missing field 'kind'".to_string(), "bad type".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Stage 'classify' violated its contract: missing field 'kind'; bad type"
        );
    }

    #[test]
    fn test_dependency_unavailable_display() {
        let err = TaskgateError::DependencyUnavailable {
            dependency: "produce".to_string(),
            retry_after_ms: 250,
        };
        assert!(err.to_string().contains("retry after 250ms"));
    }

    #[test]
    fn test_config_error_into_taskgate_error() {
        let err: TaskgateError = ConfigError::invalid("admission.capacity", "must be positive").into();
        assert!(matches!(err, TaskgateError::Config(_)));
        assert!(err.to_string().contains("admission.capacity"));
    }
}
