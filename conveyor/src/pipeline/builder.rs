//! Pipeline builder with validation.

use super::{Indexer, Initializer, PassThroughInitializer};
use crate::errors::EngineError;
use crate::recovery::{InitRecovery, RecoveryChain, RunRecovery, SinkRecovery, StepRecovery};
use crate::resilience::ResilienceChain;
use crate::sink::Sink;
use crate::step::{ContinueEvaluator, ResultEvaluator, Step};
use std::collections::HashSet;
use std::sync::Arc;

/// A step bound to its evaluator, recovery chain, and resilience chain.
#[derive(Clone)]
pub struct BoundStep {
    pub(super) step: Arc<dyn Step>,
    pub(super) evaluator: Arc<dyn ResultEvaluator>,
    pub(super) recovery: RecoveryChain<dyn StepRecovery>,
    pub(super) resilience: ResilienceChain,
}

impl BoundStep {
    /// Binds a step with the default CONTINUE evaluator and no
    /// recovery or resilience.
    #[must_use]
    pub fn new(step: Arc<dyn Step>) -> Self {
        Self {
            step,
            evaluator: Arc::new(ContinueEvaluator),
            recovery: RecoveryChain::new(),
            resilience: ResilienceChain::new(),
        }
    }

    /// Sets the evaluator mapping results to strategies.
    #[must_use]
    pub fn evaluated_by(mut self, evaluator: Arc<dyn ResultEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Sets the step's error handler chain.
    #[must_use]
    pub fn recovered_by(mut self, recovery: RecoveryChain<dyn StepRecovery>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Sets the step's resilience chain.
    #[must_use]
    pub fn wrapped_in(mut self, resilience: ResilienceChain) -> Self {
        self.resilience = resilience;
        self
    }

    /// Returns the underlying step.
    #[must_use]
    pub fn step(&self) -> &Arc<dyn Step> {
        &self.step
    }
}

impl std::fmt::Debug for BoundStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundStep")
            .field("name", &self.step.name())
            .field("pinned", &self.step.pinned())
            .finish()
    }
}

/// A sink bound to its recovery chain and resilience chain.
#[derive(Clone)]
pub struct BoundSink {
    pub(super) sink: Arc<dyn Sink>,
    pub(super) recovery: RecoveryChain<dyn SinkRecovery>,
    pub(super) resilience: ResilienceChain,
}

impl BoundSink {
    /// Binds a sink with no recovery or resilience.
    #[must_use]
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            recovery: RecoveryChain::new(),
            resilience: ResilienceChain::new(),
        }
    }

    /// Sets the sink's error handler chain.
    #[must_use]
    pub fn recovered_by(mut self, recovery: RecoveryChain<dyn SinkRecovery>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Sets the sink's resilience chain.
    #[must_use]
    pub fn wrapped_in(mut self, resilience: ResilienceChain) -> Self {
        self.resilience = resilience;
        self
    }

    /// Returns the underlying sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }
}

impl std::fmt::Debug for BoundSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSink")
            .field("name", &self.sink.name())
            .field("mode", &self.sink.mode())
            .finish()
    }
}

/// An executable pipeline: initializer, indexers, ordered steps, and
/// sinks, each with its own recovery and resilience configuration.
pub struct Pipeline {
    pub(super) name: String,
    pub(super) author: String,
    pub(super) initializer: Arc<dyn Initializer>,
    pub(super) indexers: Vec<Arc<dyn Indexer>>,
    pub(super) steps: Vec<BoundStep>,
    pub(super) sinks: Vec<BoundSink>,
    pub(super) init_recovery: RecoveryChain<dyn InitRecovery>,
    pub(super) run_recovery: RecoveryChain<dyn RunRecovery>,
}

impl Pipeline {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of configured steps.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

/// Builder for creating validated pipelines.
pub struct PipelineBuilder {
    name: String,
    author: String,
    initializer: Arc<dyn Initializer>,
    indexers: Vec<Arc<dyn Indexer>>,
    steps: Vec<BoundStep>,
    sinks: Vec<BoundSink>,
    init_recovery: RecoveryChain<dyn InitRecovery>,
    run_recovery: RecoveryChain<dyn RunRecovery>,
}

impl PipelineBuilder {
    /// Creates a builder for a named pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            author: "conveyor".to_string(),
            initializer: Arc::new(PassThroughInitializer),
            indexers: Vec::new(),
            steps: Vec::new(),
            sinks: Vec::new(),
            init_recovery: RecoveryChain::new(),
            run_recovery: RecoveryChain::new(),
        }
    }

    /// Sets the author recorded on every run's tag.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Sets the initializer. Defaults to passing the raw input through
    /// as the payload.
    #[must_use]
    pub fn initializer(mut self, initializer: Arc<dyn Initializer>) -> Self {
        self.initializer = initializer;
        self
    }

    /// Appends an indexer seeding the working pool.
    #[must_use]
    pub fn indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexers.push(indexer);
        self
    }

    /// Appends a step with the default CONTINUE evaluator.
    #[must_use]
    pub fn step(self, step: Arc<dyn Step>) -> Self {
        self.bound_step(BoundStep::new(step))
    }

    /// Appends a fully configured step binding.
    #[must_use]
    pub fn bound_step(mut self, step: BoundStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends a sink.
    #[must_use]
    pub fn sink(self, sink: Arc<dyn Sink>) -> Self {
        self.bound_sink(BoundSink::new(sink))
    }

    /// Appends a fully configured sink binding.
    #[must_use]
    pub fn bound_sink(mut self, sink: BoundSink) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Sets the initializer's error handler chain.
    #[must_use]
    pub fn init_recovery(mut self, chain: RecoveryChain<dyn InitRecovery>) -> Self {
        self.init_recovery = chain;
        self
    }

    /// Sets the pipeline-level error handler chain.
    #[must_use]
    pub fn run_recovery(mut self, chain: RecoveryChain<dyn RunRecovery>) -> Self {
        self.run_recovery = chain;
        self
    }

    /// Validates and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] when the name is empty, no
    /// steps are configured, or two steps share a name.
    pub fn build(self) -> Result<Pipeline, EngineError> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "pipeline name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(EngineError::Validation(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for bound in &self.steps {
            if !seen.insert(bound.step.name().to_string()) {
                return Err(EngineError::Validation(format!(
                    "duplicate step name '{}' in pipeline '{}'",
                    bound.step.name(),
                    self.name
                )));
            }
        }

        Ok(Pipeline {
            name: self.name,
            author: self.author,
            initializer: self.initializer,
            indexers: self.indexers,
            steps: self.steps,
            sinks: self.sinks,
            init_recovery: self.init_recovery,
            run_recovery: self.run_recovery,
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepOutcome, StepResult};
    use crate::errors::ErrorKind;
    use crate::step::FnStep;

    fn noop_step(name: &str) -> Arc<dyn Step> {
        Arc::new(FnStep::new(name, |_scope| {
            Ok(StepOutcome::one(StepResult::empty("noop")))
        }))
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = PipelineBuilder::new("  ")
            .step(noop_step("a"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_empty_pipeline_rejected() {
        let err = PipelineBuilder::new("p").build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let err = PipelineBuilder::new("p")
            .step(noop_step("same"))
            .step(noop_step("same"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("same"));
    }

    #[test]
    fn test_valid_pipeline_builds() {
        let pipeline = PipelineBuilder::new("p")
            .step(noop_step("a"))
            .step(noop_step("b"))
            .build()
            .unwrap();
        assert_eq!(pipeline.name(), "p");
        assert_eq!(pipeline.step_count(), 2);
    }
}
