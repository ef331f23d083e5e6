//! # Taskgate
//!
//! Resilience and orchestration core for services that fan user requests
//! out to slow, unreliable remote capabilities.
//!
//! Taskgate provides:
//!
//! - **Admission control**: per-caller token bucket, sliding window or
//!   adaptive throttling with retry hints
//! - **Circuit breaking**: per-dependency breakers with timeouts and a
//!   single half-open trial
//! - **Staged pipelines**: contract-checked stages with bounded retries,
//!   validate-fix rewinds and best-effort synthesis
//! - **Metrics**: a process-wide feed of call outcomes that adaptive
//!   admission and observability read from
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use taskgate::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("assistant")
//!     .stage(StageDefinition::new("classify", StageRole::Classify, classifier))
//!     .stage(StageDefinition::new("reply", StageRole::Synthesize, writer))
//!     .build()?;
//!
//! let runner = PipelineRunner::from_config(pipeline, &TaskgateConfig::default(), noop_sink())?;
//! let result = runner.submit_task("caller-42", serde_json::json!({"text": "hi"})).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss
)]

pub mod admission;
pub mod circuit;
pub mod config;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod observability;
pub mod pipeline;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::admission::{
        AdmissionConfig, AdmissionController, AdmissionDecision, RateLimiter,
    };
    pub use crate::circuit::{
        CallError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    };
    pub use crate::config::{PipelineConfig, TaskgateConfig};
    pub use crate::errors::{
        ConfigError, ContractErrorInfo, PipelineValidationError, TaskgateError,
    };
    pub use crate::events::{noop_sink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::metrics::{MetricsConfig, MetricsFeed};
    pub use crate::pipeline::{
        FieldShape, FnExecutor, GuardRetryPolicy, Pipeline, PipelineBuilder, PipelineRunner,
        StageContract, StageDefinition, StageError, StageExecutor, StageInput, StageRole,
        TerminalResult, TerminalStatus,
    };
    pub use crate::utils::{Clock, ManualClock, SystemClock};
}
