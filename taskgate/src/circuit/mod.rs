//! Circuit breakers for volatile dependencies.
//!
//! A breaker moves between three states:
//!
//! - `Closed`: calls pass through. Once the rolling log holds at least
//!   `volume_threshold` outcomes, reaching `failure_threshold` consecutive
//!   failures or `error_rate_threshold` opens the circuit.
//! - `Open`: calls are rejected without being invoked until
//!   `recovery_timeout_ms` has elapsed.
//! - `HalfOpen`: exactly one trial call runs. Success closes the circuit,
//!   failure reopens it with a fresh recovery deadline.
//!
//! Every call is bounded by `call_timeout_ms`; a timeout is a failure.

mod breaker;
mod config;
mod registry;
mod state;

pub use breaker::{CallError, CircuitBreaker};
pub use config::CircuitBreakerConfig;
pub use registry::CircuitBreakerRegistry;
pub use state::{CircuitRecord, CircuitState};
