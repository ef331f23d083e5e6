//! Mock executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use crate::pipeline::{StageError, StageExecutor, StageInput};

/// An executor that plays back queued responses and records every input.
///
/// Once the queue is empty it keeps returning its default response.
#[derive(Debug)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<Value, StageError>>>,
    default: Mutex<Result<Value, StageError>>,
    inputs: Mutex<Vec<StageInput>>,
}

impl ScriptedExecutor {
    /// Creates an executor that returns `output` unless scripted otherwise.
    #[must_use]
    pub fn new(output: Value) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(Ok(output)),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Queues a successful response.
    pub fn push_ok(&self, output: Value) {
        self.script.lock().push_back(Ok(output));
    }

    /// Queues a provider error.
    pub fn push_err(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(Err(StageError::provider(message)));
    }

    /// Replaces the default response with `output`.
    pub fn always_ok(&self, output: Value) {
        *self.default.lock() = Ok(output);
    }

    /// Replaces the default response with a provider error.
    pub fn always_fail(&self, message: impl Into<String>) {
        *self.default.lock() = Err(StageError::provider(message));
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inputs.lock().len()
    }

    /// Returns every input received, in order.
    #[must_use]
    pub fn inputs(&self) -> Vec<StageInput> {
        self.inputs.lock().clone()
    }

    /// Returns the hint passed on each invocation.
    #[must_use]
    pub fn hints(&self) -> Vec<Option<String>> {
        self.inputs.lock().iter().map(|i| i.hint.clone()).collect()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn invoke(&self, input: &StageInput) -> Result<Value, StageError> {
        self.inputs.lock().push(input.clone());
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.default.lock().clone())
    }
}

/// An executor that always fails.
#[derive(Debug)]
pub struct FailingExecutor {
    message: String,
    calls: Mutex<usize>,
}

impl FailingExecutor {
    /// Creates a failing executor.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            calls: Mutex::new(0),
        }
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl StageExecutor for FailingExecutor {
    async fn invoke(&self, _input: &StageInput) -> Result<Value, StageError> {
        *self.calls.lock() += 1;
        Err(StageError::provider(self.message.clone()))
    }
}

/// An executor that sleeps before answering.
#[derive(Debug)]
pub struct SlowExecutor {
    delay: Duration,
    output: Value,
}

impl SlowExecutor {
    /// Creates an executor that returns `output` after `delay`.
    #[must_use]
    pub fn new(delay: Duration, output: Value) -> Self {
        Self { delay, output }
    }
}

#[async_trait]
impl StageExecutor for SlowExecutor {
    async fn invoke(&self, _input: &StageInput) -> Result<Value, StageError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageRole;
    use serde_json::json;
    use uuid::Uuid;

    fn input(hint: Option<&str>) -> StageInput {
        StageInput {
            task_id: Uuid::nil(),
            caller_key: "c".to_string(),
            stage: "s".to_string(),
            role: StageRole::Produce,
            input: Value::Null,
            prior_outputs: Vec::new(),
            hint: hint.map(str::to_string),
            attempt: 1,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_executor_plays_queue_then_default() {
        let executor = ScriptedExecutor::new(json!("default"));
        executor.push_ok(json!("first"));
        executor.push_err("boom");

        assert_eq!(executor.invoke(&input(None)).await.unwrap(), json!("first"));
        assert!(executor.invoke(&input(Some("fix it"))).await.is_err());
        assert_eq!(executor.invoke(&input(None)).await.unwrap(), json!("default"));
        assert_eq!(executor.call_count(), 3);
        assert_eq!(executor.hints()[1].as_deref(), Some("fix it"));
    }

    #[tokio::test]
    async fn test_failing_executor() {
        let executor = FailingExecutor::new("down");
        let err = executor.invoke(&input(None)).await.unwrap_err();
        assert_eq!(err, StageError::provider("down"));
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_executor_waits() {
        let executor = SlowExecutor::new(Duration::from_secs(5), json!(1));
        let started = tokio::time::Instant::now();
        executor.invoke(&input(None)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
