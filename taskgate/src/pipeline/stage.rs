//! Stage roles, executor interface and per-invocation types.

use super::contract::StageContract;
use super::task::TaskPhase;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// What a stage does within the task flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    /// Works out what kind of request this is.
    Classify,
    /// Decides how the request will be handled.
    Delegate,
    /// Produces the main artifact.
    Produce,
    /// Checks the produced artifact.
    Validate,
    /// Turns accumulated outputs into the user-facing result.
    Synthesize,
}

impl StageRole {
    /// The task phase while a stage with this role runs.
    #[must_use]
    pub const fn phase(self) -> TaskPhase {
        match self {
            Self::Classify => TaskPhase::Classifying,
            Self::Delegate => TaskPhase::Delegating,
            Self::Produce => TaskPhase::Producing,
            Self::Validate => TaskPhase::Validating,
            Self::Synthesize => TaskPhase::Synthesizing,
        }
    }

    /// Role name as used in events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Delegate => "delegate",
            Self::Produce => "produce",
            Self::Validate => "validate",
            Self::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted output of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// Stage role.
    pub role: StageRole,
    /// The validated payload.
    pub output: Value,
    /// Invocations it took to get this output.
    pub attempts: u32,
}

/// Everything an executor sees for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageInput {
    /// Owning task.
    pub task_id: Uuid,
    /// Caller that submitted the task.
    pub caller_key: String,
    /// Stage being invoked.
    pub stage: String,
    /// Role of the stage being invoked.
    pub role: StageRole,
    /// The task's original input.
    pub input: Value,
    /// Outputs of the stages that already ran, in order.
    pub prior_outputs: Vec<StageRecord>,
    /// Corrective hint when re-invoked after a malformed or rejected output.
    pub hint: Option<String>,
    /// 1-based invocation count for this stage within the task.
    pub attempt: u32,
    /// Why the task errored, for synthesis after a failure.
    pub error: Option<String>,
}

impl StageInput {
    /// Returns the accepted output of an earlier stage.
    #[must_use]
    pub fn output_of(&self, stage: &str) -> Option<&Value> {
        self.prior_outputs
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.output)
    }

    /// Returns true if this is a re-invocation.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

/// Errors an executor may report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// The remote provider failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The executor could not use its input.
    #[error("Invalid stage input: {0}")]
    InvalidInput(String),
}

impl StageError {
    /// Creates a provider error.
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }
}

/// Outcome of one stage invocation after contract validation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// Output satisfies the contract.
    Ok(Value),
    /// Output violates the contract.
    Invalid(Vec<String>),
    /// The invocation itself failed.
    Failed(String),
}

impl StageResult {
    /// Classifies a raw invocation outcome against `contract`.
    #[must_use]
    pub fn evaluate(outcome: Result<Value, String>, contract: &StageContract) -> Self {
        match outcome {
            Ok(value) => match contract.validate(&value) {
                Ok(()) => Self::Ok(value),
                Err(reasons) => Self::Invalid(reasons),
            },
            Err(error) => Self::Failed(error),
        }
    }

    /// Returns true for [`StageResult::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// The remote capability behind a stage.
///
/// Implementations carry no retry or rate-limit logic of their own; the
/// runner supplies both.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Invokes the stage.
    async fn invoke(&self, input: &StageInput) -> Result<Value, StageError>;
}

type BoxedFn = Box<dyn Fn(StageInput) -> BoxFuture<'static, Result<Value, StageError>> + Send + Sync>;

/// Adapts an async closure into a [`StageExecutor`].
///
/// ```
/// use taskgate::pipeline::FnExecutor;
///
/// let executor = FnExecutor::new(|input| async move {
///     Ok(serde_json::json!({"echo": input.input}))
/// });
/// # let _ = executor;
/// ```
pub struct FnExecutor {
    f: BoxedFn,
}

impl FnExecutor {
    /// Wraps `f`. It receives an owned copy of the stage input.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(StageInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StageError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |input| f(input).boxed()),
        }
    }
}

impl fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl StageExecutor for FnExecutor {
    async fn invoke(&self, input: &StageInput) -> Result<Value, StageError> {
        (self.f)(input.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FieldShape;
    use serde_json::json;

    fn input() -> StageInput {
        StageInput {
            task_id: Uuid::nil(),
            caller_key: "caller".to_string(),
            stage: "produce".to_string(),
            role: StageRole::Produce,
            input: json!({"q": 1}),
            prior_outputs: vec![StageRecord {
                stage: "classify".to_string(),
                role: StageRole::Classify,
                output: json!({"kind": "task"}),
                attempts: 1,
            }],
            hint: None,
            attempt: 1,
            error: None,
        }
    }

    #[test]
    fn test_role_phases() {
        assert_eq!(StageRole::Classify.phase(), TaskPhase::Classifying);
        assert_eq!(StageRole::Synthesize.phase(), TaskPhase::Synthesizing);
        assert_eq!(StageRole::Validate.to_string(), "validate");
    }

    #[test]
    fn test_output_of_prior_stage() {
        let input = input();
        assert_eq!(input.output_of("classify"), Some(&json!({"kind": "task"})));
        assert!(input.output_of("delegate").is_none());
        assert!(!input.is_retry());
    }

    #[test]
    fn test_evaluate_outcomes() {
        let contract = StageContract::new().require("body", FieldShape::NonEmptyString);

        assert!(StageResult::evaluate(Ok(json!({"body": "x"})), &contract).is_ok());
        assert!(matches!(
            StageResult::evaluate(Ok(json!({})), &contract),
            StageResult::Invalid(reasons) if reasons.len() == 1
        ));
        assert_eq!(
            StageResult::evaluate(Err("down".to_string()), &contract),
            StageResult::Failed("down".to_string())
        );
    }

    #[tokio::test]
    async fn test_fn_executor_receives_input() {
        let executor = FnExecutor::new(|input: StageInput| async move {
            Ok(json!({"stage": input.stage, "attempt": input.attempt}))
        });
        let output = executor.invoke(&input()).await.unwrap();
        assert_eq!(output, json!({"stage": "produce", "attempt": 1}));
    }

    #[tokio::test]
    async fn test_mock_executor() {
        let mut mock = MockStageExecutor::new();
        mock.expect_invoke()
            .times(1)
            .returning(|_| Err(StageError::provider("quota exceeded")));

        let err = mock.invoke(&input()).await.unwrap_err();
        assert_eq!(err.to_string(), "Provider error: quota exceeded");
    }
}
