//! Sequential task runner.
//!
//! Drives one task through its pipeline. Every stage entry passes admission,
//! every executor call passes the stage's circuit breaker, and every output
//! is checked against the stage contract before it is accepted. The runner
//! always returns a [`TerminalResult`]; failures end up in its status.

use super::builder::{Pipeline, StageDefinition};
use super::guard_retry::{guard_issues, GuardRetryState, GuardVerdict};
use super::stage::{StageInput, StageRecord, StageResult};
use super::task::{Task, TaskPhase, TerminalResult, TerminalStatus};
use crate::admission::AdmissionController;
use crate::circuit::CircuitBreakerRegistry;
use crate::config::TaskgateConfig;
use crate::errors::{ConfigError, TaskgateError};
use crate::events::{noop_sink, types, EventSink};
use crate::metrics::{caller_operation, MetricsFeed};
use crate::observability::{task_span, SpanTimer};
use crate::utils::{Clock, SystemClock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

const RATE_LIMITED_MESSAGE: &str = "Too many requests right now. Please try again shortly.";
const FALLBACK_MESSAGE: &str =
    "Sorry, something went wrong while handling your request. Please try again later.";

/// How the non-synthesis stages ended.
enum StageFlow {
    Finished,
    RateLimited(Option<u64>),
    Errored(String),
}

/// Status and payload decided for a task.
struct Outcome {
    status: TerminalStatus,
    payload: Value,
    retry_after_ms: Option<u64>,
    error: Option<String>,
}

impl Outcome {
    fn rate_limited(retry_after_ms: Option<u64>, error: Option<String>) -> Self {
        Self {
            status: TerminalStatus::RateLimited,
            payload: json!({
                "message": RATE_LIMITED_MESSAGE,
                "retry_after_ms": retry_after_ms,
            }),
            retry_after_ms,
            error,
        }
    }
}

/// Runs tasks through a [`Pipeline`].
///
/// Shares its admission controller, circuit registry and metrics feed with
/// any number of concurrent tasks. Each task itself runs strictly in order.
pub struct PipelineRunner {
    pipeline: Arc<Pipeline>,
    admission: Arc<AdmissionController>,
    circuits: Arc<CircuitBreakerRegistry>,
    metrics: Arc<MetricsFeed>,
    event_sink: Arc<dyn EventSink>,
}

impl fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("pipeline", &self.pipeline.name())
            .field("admission", &self.admission)
            .finish_non_exhaustive()
    }
}

impl PipelineRunner {
    /// Creates a runner over shared components.
    pub fn new(
        pipeline: Arc<Pipeline>,
        admission: Arc<AdmissionController>,
        circuits: Arc<CircuitBreakerRegistry>,
        metrics: Arc<MetricsFeed>,
    ) -> Self {
        Self {
            pipeline,
            admission,
            circuits,
            metrics,
            event_sink: noop_sink(),
        }
    }

    /// Wires every component from configuration.
    ///
    /// All components share one system clock, one metrics feed and `sink`.
    /// The configured retry bound replaces the pipeline's default.
    pub fn from_config(
        pipeline: Pipeline,
        config: &TaskgateConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pipeline = pipeline.with_config(&config.pipeline);
        let clock: Arc<dyn Clock> = SystemClock::shared();
        let metrics = Arc::new(MetricsFeed::with_clock(config.metrics.clone(), clock.clone()));
        let admission = Arc::new(
            AdmissionController::from_config(&config.admission, metrics.clone(), clock)
                .with_event_sink(sink.clone()),
        );
        let circuits = Arc::new(
            CircuitBreakerRegistry::new(config.circuit.clone(), metrics.clone())
                .with_event_sink(sink.clone()),
        );
        Ok(Self::new(Arc::new(pipeline), admission, circuits, metrics).with_event_sink(sink))
    }

    /// Sets the sink that receives stage and task events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// The pipeline being run.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// The shared admission controller.
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// The shared circuit breaker registry.
    pub fn circuits(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.circuits
    }

    /// The shared metrics feed.
    pub fn metrics(&self) -> &Arc<MetricsFeed> {
        &self.metrics
    }

    /// Creates a task for `caller_key` and runs it to completion.
    pub async fn submit_task(&self, caller_key: impl Into<String>, input: Value) -> TerminalResult {
        let mut task = Task::new(caller_key, input);
        self.run(&mut task).await
    }

    /// Runs `task` to its terminal result.
    ///
    /// The result is also stored on the task.
    pub async fn run(&self, task: &mut Task) -> TerminalResult {
        let timer = SpanTimer::start("task");
        debug!(
            task_id = %task.id,
            caller_key = %task.caller_key,
            pipeline = %self.pipeline.name(),
            "Task started"
        );

        let span = task_span(&task.id.to_string(), &task.caller_key, self.pipeline.name());
        let outcome = match self.run_stages(task).instrument(span.clone()).await {
            StageFlow::Finished => self.synthesize(task, None).instrument(span).await,
            StageFlow::Errored(error) => self.synthesize(task, Some(error)).instrument(span).await,
            StageFlow::RateLimited(retry_after_ms) => Outcome::rate_limited(retry_after_ms, None),
        };

        task.phase = match outcome.status {
            TerminalStatus::Completed | TerminalStatus::RateLimited => TaskPhase::Done,
            TerminalStatus::Degraded | TerminalStatus::Fatal => TaskPhase::Errored,
        };
        let duration_ms = timer.finish();
        self.record_caller_outcome(task, outcome.status, duration_ms);

        let result = TerminalResult {
            task_id: task.id,
            status: outcome.status,
            payload: outcome.payload,
            stage_outputs: task.outputs.clone(),
            retry_after_ms: outcome.retry_after_ms,
            error: outcome.error,
            duration_ms,
        };

        match result.status {
            TerminalStatus::Completed | TerminalStatus::RateLimited => info!(
                task_id = %task.id,
                caller_key = %task.caller_key,
                status = %result.status,
                duration_ms,
                "Task finished"
            ),
            TerminalStatus::Degraded | TerminalStatus::Fatal => warn!(
                task_id = %task.id,
                caller_key = %task.caller_key,
                status = %result.status,
                error = result.error.as_deref().unwrap_or_default(),
                duration_ms,
                "Task finished with errors"
            ),
        }
        self.event_sink.try_emit(
            types::TASK_COMPLETED,
            Some(json!({
                "task_id": task.id.to_string(),
                "caller_key": task.caller_key,
                "status": result.status.as_str(),
                "duration_ms": duration_ms,
            })),
        );

        task.result = Some(result.clone());
        result
    }

    async fn run_stages(&self, task: &mut Task) -> StageFlow {
        let stages = self.pipeline.stages();
        let synthesis_index = stages.len() - 1;
        let mut guards: HashMap<String, GuardRetryState> = HashMap::new();
        let mut hints: HashMap<String, String> = HashMap::new();

        task.stage_index = 0;
        while task.stage_index < synthesis_index {
            let definition = &stages[task.stage_index];
            task.phase = definition.role.phase();

            let decision = self.admission.allow_one(&task.caller_key);
            if !decision.allowed {
                return StageFlow::RateLimited(decision.retry_after_ms);
            }

            let hint = hints.remove(&definition.name);
            let (output, attempts) = match self.invoke_stage(task, definition, hint, None).await {
                Ok(accepted) => accepted,
                Err(error) => return StageFlow::Errored(error),
            };

            if let (Some(policy), Some(issues)) = (&definition.guard_retry, guard_issues(&output)) {
                let state = guards.entry(definition.name.clone()).or_default();
                let verdict = state.on_rejection(policy, task.output_of(&policy.retry_stage));
                let attempt = state.attempts;
                match verdict {
                    GuardVerdict::Retry => {
                        let Some(position) = self.pipeline.position(&policy.retry_stage) else {
                            return StageFlow::Errored(format!(
                                "Retry stage '{}' not found",
                                policy.retry_stage
                            ));
                        };
                        let joined = issues.join("; ");
                        debug!(
                            task_id = %task.id,
                            guard = %definition.name,
                            retry_stage = %policy.retry_stage,
                            attempt,
                            issues = %joined,
                            "Guard rejected output, rewinding"
                        );
                        self.event_sink.try_emit(
                            types::STAGE_RETRY,
                            Some(json!({
                                "task_id": task.id.to_string(),
                                "stage": policy.retry_stage,
                                "attempt": attempt,
                                "reason": "guard",
                                "issues": issues,
                            })),
                        );
                        hints.insert(
                            policy.retry_stage.clone(),
                            format!("validator rejected prior output: {joined}"),
                        );
                        task.rewind_to(&policy.retry_stage);
                        task.stage_index = position;
                        continue;
                    }
                    GuardVerdict::Exhausted => {
                        return StageFlow::Errored(format!(
                            "Guard '{}' still rejected '{}' after {} retries: {}",
                            definition.name,
                            policy.retry_stage,
                            policy.max_attempts,
                            issues.join("; ")
                        ));
                    }
                    GuardVerdict::Stagnant => {
                        return StageFlow::Errored(format!(
                            "Stage '{}' kept returning the same output rejected by '{}'",
                            policy.retry_stage, definition.name
                        ));
                    }
                }
            }

            task.outputs.push(StageRecord {
                stage: definition.name.clone(),
                role: definition.role,
                output,
                attempts,
            });
            task.stage_index += 1;
        }
        StageFlow::Finished
    }

    async fn synthesize(&self, task: &mut Task, failure: Option<String>) -> Outcome {
        let definition = self.pipeline.synthesis();
        task.phase = TaskPhase::Synthesizing;
        task.stage_index = self.pipeline.len() - 1;

        let decision = self.admission.allow_one(&task.caller_key);
        if !decision.allowed {
            return Outcome::rate_limited(decision.retry_after_ms, failure);
        }

        match self.invoke_stage(task, definition, None, failure.clone()).await {
            Ok((payload, attempts)) => {
                task.outputs.push(StageRecord {
                    stage: definition.name.clone(),
                    role: definition.role,
                    output: payload.clone(),
                    attempts,
                });
                let status = if failure.is_some() {
                    TerminalStatus::Degraded
                } else {
                    TerminalStatus::Completed
                };
                Outcome {
                    status,
                    payload,
                    retry_after_ms: None,
                    error: failure,
                }
            }
            Err(error) => {
                let error = match failure {
                    Some(failure) => format!("{failure}; synthesis failed: {error}"),
                    None => format!("synthesis failed: {error}"),
                };
                Outcome {
                    status: TerminalStatus::Fatal,
                    payload: json!({ "message": FALLBACK_MESSAGE }),
                    retry_after_ms: None,
                    error: Some(error),
                }
            }
        }
    }

    /// Invokes one stage until it yields a contract-satisfying output.
    ///
    /// Returns the output and how many invocations it took, or the error
    /// that ends the stage.
    async fn invoke_stage(
        &self,
        task: &mut Task,
        definition: &StageDefinition,
        mut hint: Option<String>,
        error: Option<String>,
    ) -> Result<(Value, u32), String> {
        let max_retries = self.pipeline.max_retries_for(definition);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let attempt = {
                let count = task.invocations.entry(definition.name.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let input = StageInput {
                task_id: task.id,
                caller_key: task.caller_key.clone(),
                stage: definition.name.clone(),
                role: definition.role,
                input: task.input.clone(),
                prior_outputs: task.outputs.clone(),
                hint: hint.take(),
                attempt,
                error: error.clone(),
            };

            self.event_sink.try_emit(
                types::STAGE_STARTED,
                Some(json!({
                    "task_id": task.id.to_string(),
                    "stage": definition.name,
                    "attempt": attempt,
                })),
            );
            let timer = SpanTimer::start(definition.name.as_str());
            let outcome = self
                .circuits
                .execute(&definition.name, || definition.executor.invoke(&input))
                .await
                .map_err(|err| TaskgateError::from(err).to_string());
            let duration_ms = timer.finish();

            match StageResult::evaluate(outcome, &definition.contract) {
                StageResult::Ok(output) => {
                    debug!(task_id = %task.id, stage = %definition.name, attempt, duration_ms, "Stage completed");
                    self.event_sink.try_emit(
                        types::STAGE_COMPLETED,
                        Some(json!({
                            "task_id": task.id.to_string(),
                            "stage": definition.name,
                            "attempt": attempt,
                            "duration_ms": duration_ms,
                        })),
                    );
                    return Ok((output, attempts));
                }
                StageResult::Invalid(reasons) => {
                    self.event_sink.try_emit(
                        types::STAGE_INVALID,
                        Some(json!({
                            "task_id": task.id.to_string(),
                            "stage": definition.name,
                            "attempt": attempt,
                            "reasons": reasons,
                        })),
                    );
                    if task.retries_for(&definition.name) >= max_retries {
                        let violation = TaskgateError::ContractViolation {
                            stage: definition.name.clone(),
                            reasons,
                        };
                        warn!(task_id = %task.id, stage = %definition.name, error = %violation, "Stage retries exhausted");
                        return Err(violation.to_string());
                    }

                    // Same stage entry: admission was charged once before the first attempt.
                    *task.retries.entry(definition.name.clone()).or_insert(0) += 1;
                    let joined = reasons.join("; ");
                    debug!(task_id = %task.id, stage = %definition.name, reasons = %joined, "Malformed output, retrying");
                    self.event_sink.try_emit(
                        types::STAGE_RETRY,
                        Some(json!({
                            "task_id": task.id.to_string(),
                            "stage": definition.name,
                            "attempt": attempt + 1,
                            "reason": "contract",
                        })),
                    );
                    hint = Some(format!("prior attempt was malformed: {joined}"));
                }
                StageResult::Failed(failure) => {
                    warn!(task_id = %task.id, stage = %definition.name, error = %failure, "Stage failed");
                    self.event_sink.try_emit(
                        types::STAGE_FAILED,
                        Some(json!({
                            "task_id": task.id.to_string(),
                            "stage": definition.name,
                            "attempt": attempt,
                            "error": failure,
                        })),
                    );
                    return Err(failure);
                }
            }
        }
    }

    fn record_caller_outcome(&self, task: &Task, status: TerminalStatus, duration_ms: f64) {
        let success = match status {
            TerminalStatus::Completed => true,
            TerminalStatus::Degraded | TerminalStatus::Fatal => false,
            TerminalStatus::RateLimited => return,
        };
        self.metrics.record(
            &caller_operation(&task.caller_key),
            duration_ms,
            success,
            &[("status", status.as_str())],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionConfig, TokenBucketConfig};
    use crate::events::CollectingEventSink;
    use crate::config::PipelineConfig;
    use crate::pipeline::{FieldShape, FnExecutor, PipelineBuilder, StageContract, StageRole};
    use crate::testing::ScriptedExecutor;

    fn echo(name: &str, role: StageRole) -> StageDefinition {
        let executor = Arc::new(FnExecutor::new(|input: StageInput| async move {
            Ok(json!({"stage": input.stage}))
        }));
        StageDefinition::new(name, role, executor)
    }

    fn pipeline() -> Pipeline {
        PipelineBuilder::new("echo")
            .stage(echo("classify", StageRole::Classify))
            .stage(echo("reply", StageRole::Synthesize))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_from_config_runs_task() {
        let sink = Arc::new(CollectingEventSink::new());
        let runner =
            PipelineRunner::from_config(pipeline(), &TaskgateConfig::default(), sink.clone())
                .unwrap();

        let result = runner.submit_task("alice", json!({"q": "hi"})).await;
        assert_eq!(result.status, TerminalStatus::Completed);
        assert_eq!(result.payload, json!({"stage": "reply"}));
        assert_eq!(sink.payloads_of(types::TASK_COMPLETED).len(), 1);
        assert_eq!(runner.circuits().len(), 2);

        let snapshot = runner.metrics().snapshot("caller.alice").unwrap();
        assert_eq!(snapshot.success_count, 1);
    }

    #[tokio::test]
    async fn test_from_config_applies_retry_bound() {
        let executor = Arc::new(ScriptedExecutor::new(json!({"body": ""})));
        let pipeline = PipelineBuilder::new("retry")
            .stage(
                StageDefinition::new("produce", StageRole::Produce, executor.clone()).with_contract(
                    StageContract::new().require("body", FieldShape::NonEmptyString),
                ),
            )
            .stage(echo("reply", StageRole::Synthesize))
            .build()
            .unwrap();
        let config = TaskgateConfig::default()
            .with_pipeline(PipelineConfig::new().with_default_max_retries(3));
        let runner = PipelineRunner::from_config(pipeline, &config, noop_sink()).unwrap();

        let result = runner.submit_task("alice", json!(null)).await;
        assert_eq!(result.status, TerminalStatus::Degraded);
        assert_eq!(executor.call_count(), 4);
        assert_eq!(runner.pipeline().max_retries_for(&runner.pipeline().stages()[0]), 3);
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let config = TaskgateConfig::default().with_admission(AdmissionConfig::TokenBucket(
            TokenBucketConfig::new(0, 1.0, 1_000),
        ));
        let err = PipelineRunner::from_config(pipeline(), &config, noop_sink()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_run_stores_result_on_task() {
        let runner =
            PipelineRunner::from_config(pipeline(), &TaskgateConfig::default(), noop_sink())
                .unwrap();
        let mut task = Task::new("bob", json!(null));

        let result = runner.run(&mut task).await;
        assert_eq!(task.result.as_ref(), Some(&result));
        assert_eq!(task.phase, TaskPhase::Done);
        assert_eq!(task.invocations_of("classify"), 1);
    }
}
