//! One breaker per dependency name.

use super::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::events::{noop_sink, EventSink};
use crate::metrics::MetricsFeed;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Lazily creates and hands out circuit breakers by dependency name.
///
/// Constructed once at startup and passed to whatever wraps dependency
/// calls. Names without an override use the default config.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    metrics: Arc<MetricsFeed>,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("default_config", &self.default_config)
            .field("overrides", &self.overrides)
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig, metrics: Arc<MetricsFeed>) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            overrides: HashMap::new(),
            metrics,
            event_sink: noop_sink(),
        }
    }

    /// Sets the sink handed to every breaker created from now on.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Uses `config` for the dependency `name` instead of the default.
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(name.into(), config);
        self
    }

    /// Returns the breaker for `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.default_config.clone());
                debug!(dependency = name, "Creating circuit breaker");
                Arc::new(
                    CircuitBreaker::new(name, config, self.metrics.clone())
                        .with_event_sink(self.event_sink.clone()),
                )
            })
            .clone()
    }

    /// Runs `call` through the breaker for `name`.
    pub async fn execute<T, E, F, Fut>(&self, name: &str, call: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.get(name).execute(call).await
    }

    /// Runs `call` through the breaker for `name`, substituting `fallback` on failure.
    pub async fn execute_with_fallback<T, E, F, Fut, FB>(
        &self,
        name: &str,
        call: F,
        fallback: FB,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        FB: FnOnce(&CallError<E>) -> T,
    {
        self.get(name).execute_with_fallback(call, fallback).await
    }

    /// Current state of every known breaker, sorted by name.
    #[must_use]
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();
        let mut states: Vec<_> = breakers
            .iter()
            .map(|b| (b.name().to_string(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Number of breakers created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Returns true if no breaker has been created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Closes every breaker.
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
    }
}
