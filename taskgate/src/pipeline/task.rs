//! Tasks and their terminal results.

use super::stage::StageRecord;
use crate::utils::generate_uuid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Where a task is in the stage flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Classify stage running.
    #[default]
    Classifying,
    /// Delegate stage running.
    Delegating,
    /// Produce stage running.
    Producing,
    /// Validate stage running.
    Validating,
    /// Synthesis running.
    Synthesizing,
    /// Finished normally or rate limited.
    Done,
    /// Finished after an unrecoverable failure.
    Errored,
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Every stage succeeded.
    Completed,
    /// Admission was denied; the payload is a locally produced notice.
    RateLimited,
    /// A stage failed but synthesis still produced a message.
    Degraded,
    /// Synthesis failed too; the payload is the built-in fallback.
    Fatal,
}

impl TerminalStatus {
    /// Status name as used in events and metrics tags.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RateLimited => "rate_limited",
            Self::Degraded => "degraded",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller receives. Always produced, never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalResult {
    /// The task.
    pub task_id: Uuid,
    /// How the task ended.
    pub status: TerminalStatus,
    /// User-facing payload.
    pub payload: Value,
    /// Accepted stage outputs, in execution order.
    pub stage_outputs: Vec<StageRecord>,
    /// Retry hint when rate limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// What went wrong, when something did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent in the runner.
    pub duration_ms: f64,
}

impl TerminalResult {
    /// Returns true for [`TerminalStatus::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == TerminalStatus::Completed
    }

    /// Returns the accepted output of `stage`.
    #[must_use]
    pub fn output_of(&self, stage: &str) -> Option<&Value> {
        self.stage_outputs
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.output)
    }
}

/// One unit of work moving through a pipeline.
///
/// Mutated only by the runner. Discarded once its result is delivered.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique id.
    pub id: Uuid,
    /// Originating caller.
    pub caller_key: String,
    /// Free-form input.
    pub input: Value,
    /// Accepted stage outputs, in order.
    pub outputs: Vec<StageRecord>,
    /// Index of the stage currently running.
    pub stage_index: usize,
    /// Contract retries spent per stage.
    pub retries: HashMap<String, u32>,
    /// Invocations made per stage.
    pub invocations: HashMap<String, u32>,
    /// Current phase.
    pub phase: TaskPhase,
    /// Set once the task finishes.
    pub result: Option<TerminalResult>,
}

impl Task {
    /// Creates a task at the start of the flow.
    #[must_use]
    pub fn new(caller_key: impl Into<String>, input: Value) -> Self {
        Self {
            id: generate_uuid(),
            caller_key: caller_key.into(),
            input,
            outputs: Vec::new(),
            stage_index: 0,
            retries: HashMap::new(),
            invocations: HashMap::new(),
            phase: TaskPhase::default(),
            result: None,
        }
    }

    /// Returns the accepted output of `stage`.
    #[must_use]
    pub fn output_of(&self, stage: &str) -> Option<&Value> {
        self.outputs
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.output)
    }

    /// Contract retries spent on `stage`.
    #[must_use]
    pub fn retries_for(&self, stage: &str) -> u32 {
        self.retries.get(stage).copied().unwrap_or(0)
    }

    /// Invocations made of `stage`.
    #[must_use]
    pub fn invocations_of(&self, stage: &str) -> u32 {
        self.invocations.get(stage).copied().unwrap_or(0)
    }

    /// Drops accepted outputs from `stage` onward.
    pub(crate) fn rewind_to(&mut self, stage: &str) {
        if let Some(position) = self.outputs.iter().position(|r| r.stage == stage) {
            self.outputs.truncate(position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageRole;
    use serde_json::json;

    fn record(stage: &str) -> StageRecord {
        StageRecord {
            stage: stage.to_string(),
            role: StageRole::Produce,
            output: json!({"stage": stage}),
            attempts: 1,
        }
    }

    #[test]
    fn test_new_task() {
        let task = Task::new("caller", json!({"q": "hi"}));
        assert_eq!(task.phase, TaskPhase::Classifying);
        assert_eq!(task.stage_index, 0);
        assert!(task.result.is_none());
        assert_eq!(task.retries_for("any"), 0);
    }

    #[test]
    fn test_rewind_drops_later_outputs() {
        let mut task = Task::new("caller", json!(null));
        task.outputs = vec![record("a"), record("b"), record("c")];

        task.rewind_to("b");
        let stages: Vec<_> = task.outputs.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(stages, vec!["a"]);

        task.rewind_to("missing");
        assert_eq!(task.outputs.len(), 1);
    }

    #[test]
    fn test_terminal_result_serialization() {
        let result = TerminalResult {
            task_id: Uuid::nil(),
            status: TerminalStatus::RateLimited,
            payload: json!({"message": "slow down"}),
            stage_outputs: Vec::new(),
            retry_after_ms: Some(98),
            error: None,
            duration_ms: 0.0,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "rate_limited");
        assert_eq!(json["retry_after_ms"], 98);
        assert!(json.get("error").is_none());
    }
}
