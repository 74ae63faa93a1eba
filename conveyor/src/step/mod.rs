//! Step trait and targeting model.
//!
//! Steps are the units of work in a conveyor pipeline. Each step
//! declares how it is targeted: over every working-pool member
//! individually, over the raw external input once, or over the payload
//! once.

mod strategy;
mod subpipeline;

pub use strategy::{
    ContinueEvaluator, FnEvaluator, ResultEvaluator, StepStrategy, StrategyBehaviours,
};
pub use subpipeline::SubPipelineStep;

use crate::context::Context;
use crate::core::{AnyPayload, Indexable, Output, ResultView, StepOutcome};
use crate::errors::EngineError;
use async_trait::async_trait;
use std::sync::Arc;

/// How a step resolves its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepKind {
    /// Once per working-pool member, in pool order.
    #[default]
    PerObject,
    /// Once, over the raw external input.
    RawInput,
    /// Once, over the initializer's payload.
    Payload,
}

/// The target a step execution is applied to.
#[derive(Clone)]
pub enum StepTarget {
    /// One working-pool member.
    Object(Arc<dyn Indexable>),
    /// The raw external input.
    RawInput,
    /// The initializer's payload.
    Payload,
}

impl StepTarget {
    /// Returns the uid results are registered under: the object's uid,
    /// or the run's uid for global targets.
    #[must_use]
    pub fn owner_uid<'a>(&'a self, run_uid: &'a str) -> &'a str {
        match self {
            Self::Object(object) => object.uid(),
            Self::RawInput | Self::Payload => run_uid,
        }
    }

    /// Returns the targeted object, if this is a per-object target.
    #[must_use]
    pub fn object(&self) -> Option<&Arc<dyn Indexable>> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StepTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Object(object) => f.debug_tuple("Object").field(&object.uid()).finish(),
            Self::RawInput => f.write_str("RawInput"),
            Self::Payload => f.write_str("Payload"),
        }
    }
}

/// Everything one step execution sees: its target, the raw input, the
/// payload, and a result view scoped to the target's owner.
#[derive(Clone)]
pub struct StepScope {
    target: StepTarget,
    input: Arc<serde_json::Value>,
    output: Arc<Output>,
}

impl StepScope {
    /// Builds a scope for one target of one run.
    #[must_use]
    pub fn new(target: StepTarget, input: Arc<serde_json::Value>, output: Arc<Output>) -> Self {
        Self {
            target,
            input,
            output,
        }
    }

    /// Returns the target of this execution.
    #[must_use]
    pub fn target(&self) -> &StepTarget {
        &self.target
    }

    /// Returns the raw external input.
    #[must_use]
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// Returns the raw input handle for forwarding to a nested run.
    #[must_use]
    pub fn input_arc(&self) -> &Arc<serde_json::Value> {
        &self.input
    }

    /// Returns the type-erased payload.
    #[must_use]
    pub fn payload(&self) -> &AnyPayload {
        self.output.payload()
    }

    /// Returns the payload as a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TypeMismatch`] if the payload is not `T`.
    pub fn payload_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, EngineError> {
        self.output.payload_as()
    }

    /// Returns a result view scoped to the target's owner uid.
    #[must_use]
    pub fn results(&self) -> ResultView {
        let owner = self.target.owner_uid(self.output.uid()).to_string();
        self.output.results().of(owner)
    }

    /// Returns a global view over the run's results.
    #[must_use]
    pub fn all_results(&self) -> ResultView {
        self.output.result_view()
    }

    /// Returns the run's context.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        self.output.context()
    }

    /// Returns the run's output.
    #[must_use]
    pub fn output(&self) -> &Arc<Output> {
        &self.output
    }
}

impl std::fmt::Debug for StepScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepScope")
            .field("target", &self.target)
            .field("run", &self.output.uid())
            .finish()
    }
}

/// Trait for pipeline steps.
#[async_trait]
pub trait Step: Send + Sync {
    /// Returns the step's name, used as the component tag on recorded
    /// results.
    fn name(&self) -> &str;

    /// Returns how the step resolves its targets.
    fn kind(&self) -> StepKind {
        StepKind::PerObject
    }

    /// Returns true if the step still runs after a STOP strategy.
    ///
    /// Pinned steps exist for cleanup and finalization work that must
    /// happen regardless of early termination; ABORT and EXIT halt
    /// them too.
    fn pinned(&self) -> bool {
        false
    }

    /// Activation predicate: when false the target is skipped silently,
    /// producing no result and evaluating no strategy.
    fn accepts(&self, _scope: &StepScope) -> bool {
        true
    }

    /// Executes the step over one target.
    async fn execute(&self, scope: &StepScope) -> Result<StepOutcome, EngineError>;
}

/// A closure-based step.
pub struct FnStep<F>
where
    F: Fn(&StepScope) -> Result<StepOutcome, EngineError> + Send + Sync,
{
    name: String,
    kind: StepKind,
    pinned: bool,
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&StepScope) -> Result<StepOutcome, EngineError> + Send + Sync,
{
    /// Creates a per-object step from a closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::PerObject,
            pinned: false,
            func,
        }
    }

    /// Sets the step kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StepKind) -> Self {
        self.kind = kind;
        self
    }

    /// Marks the step as pinned.
    #[must_use]
    pub fn pin(mut self) -> Self {
        self.pinned = true;
        self
    }
}

impl<F> std::fmt::Debug for FnStep<F>
where
    F: Fn(&StepScope) -> Result<StepOutcome, EngineError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&StepScope) -> Result<StepOutcome, EngineError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        self.kind
    }

    fn pinned(&self) -> bool {
        self.pinned
    }

    async fn execute(&self, scope: &StepScope) -> Result<StepOutcome, EngineError> {
        (self.func)(scope)
    }
}
