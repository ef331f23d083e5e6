//! The circuit breaker state machine.

use super::{CircuitBreakerConfig, CircuitRecord, CircuitState};
use crate::errors::TaskgateError;
use crate::events::{noop_sink, types, EventSink};
use crate::metrics::MetricsFeed;
use crate::utils::{iso_timestamp, Clock};
use parking_lot::Mutex;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Why a wrapped call did not produce a value.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The circuit rejected the call without invoking it.
    #[error("Circuit '{dependency}' is open, retry after {retry_after_ms}ms")]
    Open {
        /// The dependency name.
        dependency: String,
        /// Milliseconds until a trial call may be attempted.
        retry_after_ms: u64,
    },

    /// The call exceeded the configured deadline.
    #[error("Call to '{dependency}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The dependency name.
        dependency: String,
        /// The enforced timeout.
        timeout_ms: u64,
    },

    /// The call itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> CallError<E> {
    /// Returns true if the circuit rejected the call.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns true if the call timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the call's own error, if that is what failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(error) => Some(error),
            _ => None,
        }
    }
}

impl<E: Display> From<CallError<E>> for TaskgateError {
    fn from(error: CallError<E>) -> Self {
        match error {
            CallError::Open {
                dependency,
                retry_after_ms,
            } => Self::DependencyUnavailable {
                dependency,
                retry_after_ms,
            },
            CallError::Timeout {
                dependency,
                timeout_ms,
            } => Self::Timeout {
                dependency,
                timeout_ms,
            },
            CallError::Inner(inner) => Self::StageExecution(inner.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    error_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the call is dropped before settling.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.record.lock().trial_in_flight = false;
        }
    }
}

/// Isolates one volatile dependency.
///
/// The record is guarded by a mutex held only for bookkeeping, never across
/// the wrapped call. Every settled call is recorded in the metrics feed under
/// the dependency name, and every state change is written to the event sink.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    record: Mutex<CircuitRecord>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsFeed>,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("record", &*self.record.lock())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker for `name`.
    ///
    /// The breaker shares the metrics feed's clock.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        metrics: Arc<MetricsFeed>,
    ) -> Self {
        let clock = metrics.clock().clone();
        Self {
            name: name.into(),
            record: Mutex::new(CircuitRecord::new(config.window_size)),
            config,
            clock,
            metrics,
            event_sink: noop_sink(),
        }
    }

    /// Sets the sink receiving `circuit.state_changed` events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The dependency name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving OPEN to HALF_OPEN if the recovery time has passed.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now_ms();
        let (state, transition) = {
            let mut record = self.record.lock();
            let transition = Self::maybe_half_open(&mut record, now);
            (record.state, transition)
        };
        self.publish(transition);
        state
    }

    /// A copy of the current record.
    #[must_use]
    pub fn record(&self) -> CircuitRecord {
        self.record.lock().clone()
    }

    /// Opens the circuit regardless of history.
    pub fn force_open(&self) {
        let now = self.clock.now_ms();
        let transition = {
            let mut record = self.record.lock();
            let from = record.state;
            Self::open(&mut record, now, self.config.recovery_timeout_ms);
            (from != CircuitState::Open).then(|| Transition {
                from,
                to: CircuitState::Open,
                error_rate: record.error_rate(),
            })
        };
        self.publish(transition);
    }

    /// Closes the circuit and forgets all history.
    pub fn reset(&self) {
        let transition = {
            let mut record = self.record.lock();
            let from = record.state;
            *record = CircuitRecord::new(self.config.window_size);
            (from != CircuitState::Closed).then(|| Transition {
                from,
                to: CircuitState::Closed,
                error_rate: 0.0,
            })
        };
        self.publish(transition);
    }

    /// Runs `call` through the breaker.
    ///
    /// Rejected immediately with [`CallError::Open`] while open, or while
    /// half-open with a trial already running. Otherwise the call is bounded
    /// by the configured timeout and its outcome drives the state machine.
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(retry_after_ms) => {
                self.metrics
                    .record(&self.name, 0.0, false, &[("outcome", "rejected")]);
                debug!(dependency = %self.name, retry_after_ms, "Circuit rejected call");
                return Err(CallError::Open {
                    dependency: self.name.clone(),
                    retry_after_ms,
                });
            }
        };
        let mut guard = TrialGuard {
            breaker: self,
            armed: permit == Permit::Trial,
        };

        let started = Instant::now();
        let outcome = timeout(self.config.call_timeout(), call()).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

        let result = match outcome {
            Ok(Ok(value)) => {
                self.settle(permit, true);
                self.metrics
                    .record(&self.name, duration_ms, true, &[("outcome", "success")]);
                Ok(value)
            }
            Ok(Err(error)) => {
                self.settle(permit, false);
                self.metrics
                    .record(&self.name, duration_ms, false, &[("outcome", "failure")]);
                debug!(dependency = %self.name, error = %error, "Wrapped call failed");
                Err(CallError::Inner(error))
            }
            Err(_) => {
                self.settle(permit, false);
                self.metrics
                    .record(&self.name, duration_ms, false, &[("outcome", "timeout")]);
                warn!(
                    dependency = %self.name,
                    timeout_ms = self.config.call_timeout_ms,
                    "Wrapped call timed out"
                );
                Err(CallError::Timeout {
                    dependency: self.name.clone(),
                    timeout_ms: self.config.call_timeout_ms,
                })
            }
        };
        guard.armed = false;
        result
    }

    /// Runs `call` and substitutes `fallback` for any failure or rejection.
    pub async fn execute_with_fallback<T, E, F, Fut, FB>(&self, call: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        FB: FnOnce(&CallError<E>) -> T,
    {
        match self.execute(call).await {
            Ok(value) => value,
            Err(error) => {
                warn!(dependency = %self.name, error = %error, "Using fallback");
                fallback(&error)
            }
        }
    }

    fn acquire(&self) -> Result<Permit, u64> {
        let now = self.clock.now_ms();
        let (permit, transition) = {
            let mut record = self.record.lock();
            let transition = Self::maybe_half_open(&mut record, now);
            let permit = match record.state {
                CircuitState::Closed => Ok(Permit::Normal),
                CircuitState::HalfOpen if !record.trial_in_flight => {
                    record.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
                CircuitState::HalfOpen => Err(1),
                CircuitState::Open => Err(record
                    .next_attempt_ms
                    .map_or(self.config.recovery_timeout_ms, |at| at.saturating_sub(now))
                    .max(1)),
            };
            (permit, transition)
        };
        self.publish(transition);
        permit
    }

    fn settle(&self, permit: Permit, success: bool) {
        let now = self.clock.now_ms();
        let transition = {
            let mut record = self.record.lock();
            record.push_outcome(success);
            if success {
                record.consecutive_failures = 0;
            } else {
                record.consecutive_failures += 1;
                record.last_failure_ms = Some(now);
            }

            match (permit, record.state) {
                (Permit::Trial, CircuitState::HalfOpen) => {
                    record.trial_in_flight = false;
                    let error_rate = record.error_rate();
                    if success {
                        record.state = CircuitState::Closed;
                        record.opened_at_ms = None;
                        record.next_attempt_ms = None;
                        record.clear_history();
                        Some(Transition {
                            from: CircuitState::HalfOpen,
                            to: CircuitState::Closed,
                            error_rate,
                        })
                    } else {
                        Self::open(&mut record, now, self.config.recovery_timeout_ms);
                        Some(Transition {
                            from: CircuitState::HalfOpen,
                            to: CircuitState::Open,
                            error_rate,
                        })
                    }
                }
                (Permit::Normal, CircuitState::Closed) if !success => {
                    let error_rate = record.error_rate();
                    if self.should_trip(&record, error_rate) {
                        Self::open(&mut record, now, self.config.recovery_timeout_ms);
                        Some(Transition {
                            from: CircuitState::Closed,
                            to: CircuitState::Open,
                            error_rate,
                        })
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        self.publish(transition);
    }

    fn should_trip(&self, record: &CircuitRecord, error_rate: f64) -> bool {
        record.volume() >= self.config.volume_threshold
            && (record.consecutive_failures >= self.config.failure_threshold
                || error_rate >= self.config.error_rate_threshold)
    }

    fn open(record: &mut CircuitRecord, now: u64, recovery_timeout_ms: u64) {
        record.state = CircuitState::Open;
        record.opened_at_ms = Some(now);
        record.next_attempt_ms = Some(now.saturating_add(recovery_timeout_ms));
        record.trial_in_flight = false;
    }

    fn maybe_half_open(record: &mut CircuitRecord, now: u64) -> Option<Transition> {
        match (record.state, record.next_attempt_ms) {
            (CircuitState::Open, Some(at)) if now >= at => {
                record.state = CircuitState::HalfOpen;
                record.trial_in_flight = false;
                Some(Transition {
                    from: CircuitState::Open,
                    to: CircuitState::HalfOpen,
                    error_rate: record.error_rate(),
                })
            }
            _ => None,
        }
    }

    fn publish(&self, transition: Option<Transition>) {
        let Some(Transition {
            from,
            to,
            error_rate,
        }) = transition
        else {
            return;
        };
        info!(
            dependency = %self.name,
            from = %from,
            to = %to,
            error_rate,
            "Circuit state changed"
        );
        self.event_sink.try_emit(
            types::CIRCUIT_STATE_CHANGED,
            Some(serde_json::json!({
                "dependency": self.name,
                "from": from,
                "to": to,
                "error_rate": error_rate,
                "timestamp": iso_timestamp(),
            })),
        );
    }
}
