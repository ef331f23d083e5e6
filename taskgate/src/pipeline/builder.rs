//! Pipeline builder with validation.

use super::contract::StageContract;
use super::guard_retry::GuardRetryPolicy;
use super::stage::{StageExecutor, StageRole};
use crate::config::PipelineConfig;
use crate::errors::{codes, ContractErrorInfo, PipelineValidationError};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// One named stage: role, executor, contract and retry bounds.
#[derive(Clone)]
pub struct StageDefinition {
    /// Unique stage name. Also the circuit breaker's dependency name.
    pub name: String,
    /// Role within the task flow.
    pub role: StageRole,
    /// The remote capability.
    pub executor: Arc<dyn StageExecutor>,
    /// Required output shape.
    pub contract: Arc<StageContract>,
    /// Contract retries for this stage; the pipeline default when `None`.
    pub max_retries: Option<u32>,
    /// Rewind policy, for validate-role stages.
    pub guard_retry: Option<GuardRetryPolicy>,
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("contract", &self.contract)
            .field("max_retries", &self.max_retries)
            .field("guard_retry", &self.guard_retry)
            .finish_non_exhaustive()
    }
}

impl StageDefinition {
    /// Creates a stage with an empty contract.
    pub fn new(name: impl Into<String>, role: StageRole, executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            name: name.into(),
            role,
            executor,
            contract: Arc::new(StageContract::new()),
            max_retries: None,
            guard_retry: None,
        }
    }

    /// Sets the output contract.
    #[must_use]
    pub fn with_contract(mut self, contract: StageContract) -> Self {
        self.contract = Arc::new(contract);
        self
    }

    /// Sets the contract retry bound.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Attaches a validate-fix rewind policy.
    #[must_use]
    pub fn with_guard_retry(mut self, policy: GuardRetryPolicy) -> Self {
        self.guard_retry = Some(policy);
        self
    }
}

/// A validated, immutable stage sequence.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageDefinition>,
    default_max_retries: u32,
}

impl Pipeline {
    /// The pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stages in execution order. The last is always the synthesis stage.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false for a built pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Looks up a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Position of a stage in execution order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// The synthesis stage.
    #[must_use]
    pub fn synthesis(&self) -> &StageDefinition {
        &self.stages[self.stages.len() - 1]
    }

    /// Contract retry bound for `stage`.
    #[must_use]
    pub fn max_retries_for(&self, stage: &StageDefinition) -> u32 {
        stage.max_retries.unwrap_or(self.default_max_retries)
    }

    /// Applies pipeline-wide settings to an already built pipeline.
    ///
    /// Per-stage retry bounds still take precedence.
    #[must_use]
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.default_max_retries = config.default_max_retries;
        self
    }
}

/// Builder for creating validated pipelines.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageDefinition>,
    default_max_retries: u32,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            default_max_retries: PipelineConfig::default().default_max_retries,
        }
    }

    /// Applies pipeline-wide settings.
    #[must_use]
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.default_max_retries = config.default_max_retries;
        self
    }

    /// Sets the contract retry bound for stages without their own.
    #[must_use]
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, definition: StageDefinition) -> Self {
        self.stages.push(definition);
        self
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, names repeat, the
    /// synthesis stage is missing or not last, or a guard retry policy is
    /// malformed.
    pub fn build(self) -> Result<Pipeline, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no stages",
                self.name
            ))
            .with_error_info(
                ContractErrorInfo::new(codes::EMPTY, "Pipeline has no stages")
                    .with_fix_hint("Add at least a synthesis stage."),
            ));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' is defined more than once",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new(codes::DUPLICATE, "Duplicate stage name")
                        .with_fix_hint("Give every stage a unique name."),
                ));
            }
        }

        self.validate_synthesis()?;
        self.validate_guard_retries()?;

        Ok(Pipeline {
            name: self.name,
            stages: self.stages,
            default_max_retries: self.default_max_retries,
        })
    }

    fn validate_synthesis(&self) -> Result<(), PipelineValidationError> {
        let synthesis: Vec<(usize, &StageDefinition)> = self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.role == StageRole::Synthesize)
            .collect();

        let last = self.stages.len() - 1;
        match synthesis.as_slice() {
            [(index, _)] if *index == last => Ok(()),
            [] => Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has no synthesis stage",
                self.name
            ))
            .with_error_info(
                ContractErrorInfo::new(codes::SYNTHESIS, "Missing synthesis stage")
                    .with_fix_hint("End the pipeline with a stage whose role is Synthesize."),
            )),
            found => Err(PipelineValidationError::new(
                "Exactly one synthesis stage is allowed and it must be last",
            )
            .with_stages(found.iter().map(|(_, s)| s.name.clone()).collect())
            .with_error_info(
                ContractErrorInfo::new(codes::SYNTHESIS, "Synthesis stage misplaced")
                    .with_context_entry("count", found.len().to_string())
                    .with_fix_hint("Keep a single Synthesize stage at the end of the pipeline."),
            )),
        }
    }

    fn validate_guard_retries(&self) -> Result<(), PipelineValidationError> {
        for (index, stage) in self.stages.iter().enumerate() {
            let Some(policy) = &stage.guard_retry else {
                continue;
            };
            let fail = |reason: String| {
                PipelineValidationError::new(format!(
                    "Invalid guard retry on '{}': {}",
                    stage.name, reason
                ))
                .with_stages(vec![stage.name.clone(), policy.retry_stage.clone()])
                .with_error_info(
                    ContractErrorInfo::new(codes::GUARD_RETRY, reason)
                        .with_context_entry("guard", stage.name.clone())
                        .with_context_entry("retry_stage", policy.retry_stage.clone()),
                )
            };

            if stage.role != StageRole::Validate {
                return Err(fail("only validate-role stages may carry a guard retry".to_string()));
            }
            policy.validate().map_err(&fail)?;
            if !self.stages[..index]
                .iter()
                .any(|s| s.name == policy.retry_stage)
            {
                return Err(fail(format!(
                    "retry stage '{}' must be defined before the guard",
                    policy.retry_stage
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FnExecutor, GuardRetryPolicy};
    use serde_json::json;

    fn stage(name: &str, role: StageRole) -> StageDefinition {
        let executor = Arc::new(FnExecutor::new(|_| async { Ok(json!({})) }));
        StageDefinition::new(name, role, executor)
    }

    #[test]
    fn test_builds_valid_pipeline() {
        let pipeline = PipelineBuilder::new("flow")
            .stage(stage("classify", StageRole::Classify))
            .stage(stage("produce", StageRole::Produce))
            .stage(
                stage("validate", StageRole::Validate)
                    .with_guard_retry(GuardRetryPolicy::new("produce")),
            )
            .stage(stage("synthesize", StageRole::Synthesize).with_max_retries(3))
            .build()
            .unwrap();

        assert_eq!(pipeline.len(), 4);
        assert_eq!(pipeline.synthesis().name, "synthesize");
        assert_eq!(pipeline.position("produce"), Some(1));
        assert_eq!(pipeline.max_retries_for(pipeline.synthesis()), 3);
        assert_eq!(pipeline.max_retries_for(&pipeline.stages()[0]), 1);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("flow").build().unwrap_err();
        assert_eq!(err.code(), Some(codes::EMPTY));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = PipelineBuilder::new("flow")
            .stage(stage("a", StageRole::Classify))
            .stage(stage("a", StageRole::Produce))
            .stage(stage("s", StageRole::Synthesize))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::DUPLICATE));
        assert_eq!(err.stages, vec!["a".to_string()]);
    }

    #[test]
    fn test_synthesis_must_be_single_and_last() {
        let missing = PipelineBuilder::new("flow")
            .stage(stage("a", StageRole::Classify))
            .build()
            .unwrap_err();
        assert_eq!(missing.code(), Some(codes::SYNTHESIS));

        let misplaced = PipelineBuilder::new("flow")
            .stage(stage("s", StageRole::Synthesize))
            .stage(stage("a", StageRole::Classify))
            .build()
            .unwrap_err();
        assert_eq!(misplaced.code(), Some(codes::SYNTHESIS));

        let doubled = PipelineBuilder::new("flow")
            .stage(stage("s1", StageRole::Synthesize))
            .stage(stage("s2", StageRole::Synthesize))
            .build()
            .unwrap_err();
        assert_eq!(doubled.stages.len(), 2);
    }

    #[test]
    fn test_guard_retry_target_must_precede_guard() {
        let err = PipelineBuilder::new("flow")
            .stage(
                stage("validate", StageRole::Validate)
                    .with_guard_retry(GuardRetryPolicy::new("produce")),
            )
            .stage(stage("produce", StageRole::Produce))
            .stage(stage("s", StageRole::Synthesize))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::GUARD_RETRY));
    }

    #[test]
    fn test_guard_retry_only_on_validate_role() {
        let err = PipelineBuilder::new("flow")
            .stage(stage("produce", StageRole::Produce))
            .stage(
                stage("check", StageRole::Delegate)
                    .with_guard_retry(GuardRetryPolicy::new("produce")),
            )
            .stage(stage("s", StageRole::Synthesize))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("validate-role"));
    }

    #[test]
    fn test_config_sets_default_retries() {
        let pipeline = PipelineBuilder::new("flow")
            .with_config(&PipelineConfig::new().with_default_max_retries(4))
            .stage(stage("s", StageRole::Synthesize))
            .build()
            .unwrap();
        assert_eq!(pipeline.max_retries_for(pipeline.synthesis()), 4);
    }
}
