//! Admission decisions and the limiter trait.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// Outcome of an admission check.
///
/// A denial is an expected answer under load, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Suggested wait before retrying, when denied and satisfiable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Capacity left for the caller after this decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

impl AdmissionDecision {
    /// An admitted request with `remaining` capacity left.
    #[must_use]
    pub const fn allowed(remaining: u64) -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
            remaining: Some(remaining),
        }
    }

    /// A denied request that may succeed after `retry_after_ms`.
    #[must_use]
    pub const fn denied(retry_after_ms: u64, remaining: u64) -> Self {
        Self {
            allowed: false,
            retry_after_ms: Some(retry_after_ms),
            remaining: Some(remaining),
        }
    }

    /// A denied request that can never be satisfied (weight above capacity).
    #[must_use]
    pub const fn unsatisfiable() -> Self {
        Self {
            allowed: false,
            retry_after_ms: None,
            remaining: None,
        }
    }
}

/// A throttling algorithm keyed by caller.
///
/// Implementations keep per-key state in a concurrent map and perform each
/// check as a single read-modify-write under that key's lock.
pub trait RateLimiter: Send + Sync + Debug {
    /// Short algorithm name for logs.
    fn algorithm(&self) -> &'static str;

    /// Decides whether `weight` units for `key` may proceed now.
    fn allow(&self, key: &str, weight: u64) -> AdmissionDecision;

    /// Drops all state for `key`; its next check starts fresh.
    fn reset(&self, key: &str);

    /// Drops keys not seen for `idle_ms`. Returns how many were removed.
    fn evict_idle(&self, idle_ms: u64) -> usize;

    /// Number of keys currently tracked.
    fn tracked_keys(&self) -> usize;

    /// How often [`tick`](Self::tick) should run; `None` if it does nothing.
    fn adjustment_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic re-adjustment hook. Only adaptive limiters do anything here.
    fn tick(&self) {}
}
