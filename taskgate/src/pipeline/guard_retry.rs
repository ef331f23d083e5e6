//! Validate-fix retry: rewinding to a producer when a guard rejects its output.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// How a validate-role stage sends work back to its producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardRetryPolicy {
    /// The stage to re-run when the guard rejects.
    pub retry_stage: String,
    /// Maximum rewinds (default: 2).
    pub max_attempts: usize,
    /// Consecutive identical producer outputs before giving up (default: 2).
    pub stagnation_limit: usize,
}

impl GuardRetryPolicy {
    /// Creates a policy rewinding to `retry_stage`.
    pub fn new(retry_stage: impl Into<String>) -> Self {
        Self {
            retry_stage: retry_stage.into(),
            max_attempts: 2,
            stagnation_limit: 2,
        }
    }

    /// Sets the maximum rewinds.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the stagnation limit.
    #[must_use]
    pub fn with_stagnation_limit(mut self, limit: usize) -> Self {
        self.stagnation_limit = limit;
        self
    }

    /// Validates the policy configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be >= 1".to_string());
        }
        if self.stagnation_limit < 1 {
            return Err("stagnation_limit must be >= 1".to_string());
        }
        Ok(())
    }
}

/// What the runner should do after a guard rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Rewind to the producer and try again.
    Retry,
    /// All rewinds are spent.
    Exhausted,
    /// The producer keeps returning the same output.
    Stagnant,
}

/// Per-guard bookkeeping within one task.
#[derive(Debug, Clone, Default)]
pub struct GuardRetryState {
    /// Rewinds made so far.
    pub attempts: usize,
    /// Consecutive rejections of an unchanged producer output.
    pub stagnation_hits: usize,
    /// Hash of the producer output last rejected.
    pub last_hash: Option<String>,
}

impl GuardRetryState {
    /// Records a rejection of `producer_output` and decides what happens next.
    pub fn on_rejection(&mut self, policy: &GuardRetryPolicy, producer_output: Option<&Value>) -> GuardVerdict {
        let hash = producer_output.and_then(hash_output);
        if hash.is_some() && hash == self.last_hash {
            self.stagnation_hits += 1;
        } else {
            self.stagnation_hits = 0;
        }
        self.last_hash = hash;

        if self.stagnation_hits >= policy.stagnation_limit {
            return GuardVerdict::Stagnant;
        }
        if self.attempts >= policy.max_attempts {
            return GuardVerdict::Exhausted;
        }
        self.attempts += 1;
        GuardVerdict::Retry
    }
}

/// Reads a guard's verdict from its output.
///
/// Returns the issues when the output carries `"valid": false`, `None` when
/// the guard accepted.
#[must_use]
pub fn guard_issues(output: &Value) -> Option<Vec<String>> {
    if output.get("valid").and_then(Value::as_bool) != Some(false) {
        return None;
    }
    let issues: Vec<String> = output
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if issues.is_empty() {
        Some(vec!["output rejected by validator".to_string()])
    } else {
        Some(issues)
    }
}

/// Builds a stable hash of a stage output for stagnation detection.
#[must_use]
pub fn hash_output(output: &Value) -> Option<String> {
    let serialized = serde_json::to_string(output).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Some(hex::encode(hasher.finalize()))
}
