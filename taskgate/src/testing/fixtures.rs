//! Test fixtures: a standard five-stage pipeline and a deterministic harness.

use std::sync::Arc;

use serde_json::json;

use super::mocks::ScriptedExecutor;
use crate::admission::{AdmissionConfig, AdmissionController, TokenBucketConfig};
use crate::circuit::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::events::{CollectingEventSink, EventSink};
use crate::metrics::{MetricsConfig, MetricsFeed};
use crate::pipeline::{
    FieldShape, GuardRetryPolicy, Pipeline, PipelineBuilder, PipelineRunner, StageContract,
    StageDefinition, StageRole,
};
use crate::utils::{Clock, ManualClock};

/// Classify, delegate, produce, validate and synthesize, each backed by a
/// [`ScriptedExecutor`] that answers with a contract-satisfying default.
#[derive(Debug, Clone)]
pub struct TestPipeline {
    /// `classify` executor. Default `{"kind": "task"}`.
    pub classify: Arc<ScriptedExecutor>,
    /// `delegate` executor. Default `{"handler": "writer"}`.
    pub delegate: Arc<ScriptedExecutor>,
    /// `produce` executor. Default `{"body": "draft"}`.
    pub produce: Arc<ScriptedExecutor>,
    /// `validate` executor. Default `{"valid": true}`.
    pub validate: Arc<ScriptedExecutor>,
    /// `synthesize` executor. Default `{"message": "done"}`.
    pub synthesize: Arc<ScriptedExecutor>,
}

impl Default for TestPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPipeline {
    /// Creates the executors.
    #[must_use]
    pub fn new() -> Self {
        Self {
            classify: Arc::new(ScriptedExecutor::new(json!({"kind": "task"}))),
            delegate: Arc::new(ScriptedExecutor::new(json!({"handler": "writer"}))),
            produce: Arc::new(ScriptedExecutor::new(json!({"body": "draft"}))),
            validate: Arc::new(ScriptedExecutor::new(json!({"valid": true}))),
            synthesize: Arc::new(ScriptedExecutor::new(json!({"message": "done"}))),
        }
    }

    /// Builds the pipeline with the default guard retry on `validate`.
    #[must_use]
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline_with_guard(GuardRetryPolicy::new("produce"))
    }

    /// Builds the pipeline with `policy` on `validate`.
    #[must_use]
    pub fn pipeline_with_guard(&self, policy: GuardRetryPolicy) -> Pipeline {
        let builder = PipelineBuilder::new("test-pipeline")
            .stage(
                StageDefinition::new("classify", StageRole::Classify, self.classify.clone())
                    .with_contract(
                        StageContract::new()
                            .require("kind", FieldShape::one_of(&["question", "task", "chat"])),
                    ),
            )
            .stage(
                StageDefinition::new("delegate", StageRole::Delegate, self.delegate.clone())
                    .with_contract(
                        StageContract::new().require("handler", FieldShape::NonEmptyString),
                    ),
            )
            .stage(
                StageDefinition::new("produce", StageRole::Produce, self.produce.clone())
                    .with_contract(StageContract::new().require("body", FieldShape::NonEmptyString)),
            )
            .stage(
                StageDefinition::new("validate", StageRole::Validate, self.validate.clone())
                    .with_contract(
                        StageContract::new()
                            .require("valid", FieldShape::Bool)
                            .optional("issues", FieldShape::Array),
                    )
                    .with_guard_retry(policy),
            )
            .stage(
                StageDefinition::new("synthesize", StageRole::Synthesize, self.synthesize.clone())
                    .with_contract(
                        StageContract::new().require("message", FieldShape::NonEmptyString),
                    ),
            );
        match builder.build() {
            Ok(pipeline) => pipeline,
            Err(err) => panic!("test pipeline is invalid: {err}"),
        }
    }
}

/// Wires runners over a manual clock and a collecting sink.
#[derive(Debug)]
pub struct TestFixture {
    /// Shared clock; advance it to move time.
    pub clock: Arc<ManualClock>,
    /// Shared metrics feed.
    pub metrics: Arc<MetricsFeed>,
    /// Receives every event.
    pub sink: Arc<CollectingEventSink>,
    /// Admission configuration for new runners.
    pub admission: AdmissionConfig,
    /// Circuit configuration for new runners.
    pub circuit: CircuitBreakerConfig,
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl TestFixture {
    /// Creates a fixture whose admission never gets in the way.
    #[must_use]
    pub fn new() -> Self {
        let clock = ManualClock::shared();
        let shared: Arc<dyn Clock> = clock.clone();
        Self {
            clock,
            metrics: Arc::new(MetricsFeed::with_clock(MetricsConfig::default(), shared)),
            sink: Arc::new(CollectingEventSink::new()),
            admission: AdmissionConfig::TokenBucket(TokenBucketConfig::new(1_000, 1_000.0, 1_000)),
            circuit: CircuitBreakerConfig::default(),
        }
    }

    /// Sets the admission configuration.
    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    /// Sets the circuit configuration.
    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitBreakerConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Builds a runner over `pipeline` with fresh admission and circuit state.
    #[must_use]
    pub fn runner(&self, pipeline: Pipeline) -> PipelineRunner {
        let sink: Arc<dyn EventSink> = self.sink.clone();
        let clock: Arc<dyn Clock> = self.clock.clone();
        let admission = AdmissionController::from_config(&self.admission, self.metrics.clone(), clock)
            .with_event_sink(sink.clone());
        let circuits = CircuitBreakerRegistry::new(self.circuit.clone(), self.metrics.clone())
            .with_event_sink(sink.clone());
        PipelineRunner::new(
            Arc::new(pipeline),
            Arc::new(admission),
            Arc::new(circuits),
            self.metrics.clone(),
        )
        .with_event_sink(sink)
    }
}
