//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage roles, executors and output contracts
//! - Pipeline builder with validation
//! - The sequential task runner with contract and guard retries

mod builder;
mod contract;
mod guard_retry;
mod runner;
mod stage;
mod task;


pub use builder::{Pipeline, PipelineBuilder, StageDefinition};
pub use contract::{FieldRule, FieldShape, StageContract};
pub use guard_retry::{
    guard_issues, hash_output, GuardRetryPolicy, GuardRetryState, GuardVerdict,
};
pub use runner::PipelineRunner;
pub use stage::{
    FnExecutor, StageError, StageExecutor, StageInput, StageRecord, StageResult, StageRole,
};
pub use task::{Task, TaskPhase, TerminalResult, TerminalStatus};

#[cfg(test)]
pub use stage::MockStageExecutor;
