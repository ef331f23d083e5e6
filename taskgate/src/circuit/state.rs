//! Circuit states and the per-dependency record.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Position of a circuit in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// A single trial call is allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    /// Returns the state name used in events and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping for one dependency.
#[derive(Debug, Clone)]
pub struct CircuitRecord {
    /// Current state.
    pub state: CircuitState,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the last failure was observed.
    pub last_failure_ms: Option<u64>,
    /// When the circuit last opened.
    pub opened_at_ms: Option<u64>,
    /// Earliest time a trial call is allowed while open.
    pub next_attempt_ms: Option<u64>,
    /// Whether the half-open trial call is running.
    pub trial_in_flight: bool,
    outcomes: VecDeque<bool>,
    window_size: usize,
}

impl CircuitRecord {
    /// Creates a closed record keeping the last `window_size` outcomes.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_ms: None,
            opened_at_ms: None,
            next_attempt_ms: None,
            trial_in_flight: false,
            outcomes: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Appends an outcome, evicting the oldest when full.
    pub fn push_outcome(&mut self, success: bool) {
        if self.outcomes.len() == self.window_size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    /// Number of outcomes in the rolling log.
    #[must_use]
    pub fn volume(&self) -> usize {
        self.outcomes.len()
    }

    /// Failure fraction over the rolling log; 0.0 when empty.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }

    /// Forgets all outcomes and counters.
    pub fn clear_history(&mut self) {
        self.outcomes.clear();
        self.consecutive_failures = 0;
    }
}
