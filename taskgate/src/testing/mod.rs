//! Testing utilities for taskgate pipelines.
//!
//! This module provides:
//! - Scripted, failing and slow executors
//! - A standard five-stage pipeline and a manual-clock harness
//! - Assertions for terminal results and emitted events

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_completed, assert_error_contains, assert_event_count, assert_stage_order,
    assert_status,
};
pub use fixtures::{TestFixture, TestPipeline};
pub use mocks::{FailingExecutor, ScriptedExecutor, SlowExecutor};
