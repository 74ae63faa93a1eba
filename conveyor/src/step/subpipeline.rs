//! Running a nested pipeline as a step of the invoking run.

use super::{Step, StepKind, StepScope};
use crate::context::Context;
use crate::core::{Output, StepOutcome, StepResult};
use crate::errors::EngineError;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use std::sync::Arc;

/// Maps a nested run's output back to a single result of the invoking
/// run.
pub type OutputMapper = dyn Fn(&Arc<Output>) -> StepResult + Send + Sync;

/// A step that runs a nested pipeline.
///
/// The nested run receives the invoking step's raw input and a fresh
/// context copied from the invoking run's context, with the invoking
/// output set as parent. The child output therefore inherits the
/// parent's results at creation and keeps its own work in its current
/// generation.
pub struct SubPipelineStep {
    name: String,
    kind: StepKind,
    pinned: bool,
    pipeline: Arc<Pipeline>,
    mapper: Arc<OutputMapper>,
    forwarded_owner: Option<String>,
}

impl SubPipelineStep {
    /// Creates a payload-kind composition step around a pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            name: name.into(),
            kind: StepKind::Payload,
            pinned: false,
            pipeline,
            mapper: Arc::new(|output: &Arc<Output>| {
                StepResult::new(
                    "subpipeline",
                    serde_json::json!({
                        "pipeline": output.tag().pipeline,
                        "run": output.uid(),
                    }),
                )
            }),
            forwarded_owner: None,
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

    /// Replaces the default output-to-result mapper.
    #[must_use]
    pub fn with_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Arc<Output>) -> StepResult + Send + Sync + 'static,
    {
        self.mapper = Arc::new(mapper);
        self
    }

    /// Also copies the nested run's descriptors for one owner uid into
    /// the invoking run's results, under that same uid.
    #[must_use]
    pub fn forwarding_owner(mut self, uid: impl Into<String>) -> Self {
        self.forwarded_owner = Some(uid.into());
        self
    }
}

impl std::fmt::Debug for SubPipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubPipelineStep")
            .field("name", &self.name)
            .field("pipeline", &self.pipeline.name())
            .finish()
    }
}

#[async_trait]
impl Step for SubPipelineStep {
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
        let ctx = Arc::new(
            Context::copy_from(scope.context()).with_parent_output(scope.output().clone()),
        );
        tracing::debug!(
            step = %self.name,
            nested = self.pipeline.name(),
            parent = scope.output().uid(),
            "running nested pipeline"
        );

        let nested = self
            .pipeline
            .run_with_context(scope.input_arc().clone(), ctx)
            .await?;

        if let Some(owner) = &self.forwarded_owner {
            scope
                .output()
                .results()
                .register_view(&nested.results().of(owner.clone()));
        }
        Ok(StepOutcome::one((self.mapper)(&nested)))
    }
}
