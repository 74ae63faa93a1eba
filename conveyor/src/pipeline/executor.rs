//! The step-execution state machine and sink dispatch.
//!
//! Steps run strictly sequentially on the invoking task. The working
//! pool starts as the full index content and only shrinks; strategy
//! behaviours mutate the pool and the flow flags after each evaluated
//! result. Concurrency appears only for concurrent sinks, which are
//! spawned and joined before the run returns.

use super::{BoundSink, BoundStep, IndexSource, IndexerKind, Pipeline};
use crate::context::Context;
use crate::core::{Output, OutputTag, ResultDescriptor, StepOutcome};
use crate::errors::EngineError;
use crate::resilience::Operation;
use crate::sink::SinkMode;
use crate::step::{StepKind, StepScope, StepTarget};
use futures::FutureExt;
use std::sync::Arc;
use tracing::Instrument;

/// Flow flags toggled by strategy behaviours.
#[derive(Debug, Default, Clone, Copy)]
struct Flow {
    stop_ordinary: bool,
    stop_all: bool,
    exit: bool,
}

impl Flow {
    fn halted(self) -> bool {
        self.stop_all || self.exit
    }

    fn skips(self, pinned: bool) -> bool {
        self.stop_ordinary && !pinned
    }
}

/// Effects of one target's evaluated results, applied after every
/// member of the batch has been registered.
#[derive(Debug, Default)]
struct PendingEffects {
    discard_current: bool,
    discard_all: bool,
    flow: Flow,
}

impl Pipeline {
    /// Runs the pipeline against a raw input with a fresh context.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Pipeline`] wrapping the original cause
    /// when the run fails and no pipeline-level handler recovers it.
    pub async fn run(&self, input: Arc<serde_json::Value>) -> Result<Arc<Output>, EngineError> {
        self.run_with_context(input, Arc::new(Context::new())).await
    }

    /// Runs the pipeline against a raw input with a caller-supplied
    /// context (nested runs pass a context referencing the parent
    /// output).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Pipeline`] wrapping the original cause
    /// when the run fails and no pipeline-level handler recovers it.
    pub async fn run_with_context(
        &self,
        input: Arc<serde_json::Value>,
        ctx: Arc<Context>,
    ) -> Result<Arc<Output>, EngineError> {
        match self.execute(input.clone(), ctx.clone()).await {
            Ok(output) => Ok(output),
            Err((error, previous)) => {
                tracing::warn!(pipeline = %self.name, error = %error, "run failed");
                match self.run_recovery.apply(error, previous, &input, &ctx).await {
                    Ok(substitute) => {
                        tracing::debug!(
                            pipeline = %self.name,
                            substitute = %substitute.uid(),
                            "run recovered with substitute output"
                        );
                        Ok(substitute)
                    }
                    Err(unrecovered) => Err(EngineError::Pipeline {
                        pipeline: self.name.clone(),
                        source: Box::new(unrecovered),
                    }),
                }
            }
        }
    }

    async fn execute(
        &self,
        input: Arc<serde_json::Value>,
        ctx: Arc<Context>,
    ) -> Result<Arc<Output>, (EngineError, Option<Arc<Output>>)> {
        let tag = OutputTag::new(&self.name, &self.author);
        let span = tracing::info_span!("pipeline_run", pipeline = %self.name, run = %tag.uid);

        async {
            let payload = match self.initializer.init(&input, &ctx).await {
                Ok(payload) => payload,
                Err(error) => self
                    .init_recovery
                    .apply(error, &input, &ctx)
                    .await
                    .map_err(|e| {
                        (
                            EngineError::Initializer {
                                source: Box::new(e),
                            },
                            None,
                        )
                    })?,
            };

            let output = Output::new(tag, payload, ctx);
            self.populate_index(&input, &output)
                .map_err(|e| (e, Some(output.clone())))?;

            let mut pool = output.index().uids();
            let mut flow = Flow::default();
            tracing::debug!(pool = pool.len(), steps = self.steps.len(), "run started");

            for bound in &self.steps {
                if flow.halted() {
                    break;
                }
                if flow.skips(bound.step.pinned()) {
                    tracing::debug!(step = bound.step.name(), "ordinary step skipped after stop");
                    continue;
                }
                Self::run_step(bound, &input, &output, &mut pool, &mut flow)
                    .await
                    .map_err(|e| (e, Some(output.clone())))?;
            }

            output.finish();
            if flow.exit {
                tracing::debug!("run exited, skipping sinks");
                return Ok(output);
            }

            self.run_sinks(&output)
                .await
                .map_err(|e| (e, Some(output.clone())))?;
            tracing::debug!(results = output.results().size(), "run finished");
            Ok(output)
        }
        .instrument(span)
        .await
    }

    fn populate_index(
        &self,
        input: &Arc<serde_json::Value>,
        output: &Arc<Output>,
    ) -> Result<(), EngineError> {
        for indexer in &self.indexers {
            let entries = match indexer.kind() {
                IndexerKind::Payload => indexer.index_from(IndexSource::Payload(output.payload()))?,
                IndexerKind::RawInput => indexer.index_from(IndexSource::RawInput(input))?,
            };
            for entry in entries {
                output.index().index_entry(entry)?;
            }
        }
        Ok(())
    }

    /// Runs one step over its applicable targets, applying strategy
    /// behaviours after each target's batch is fully registered.
    async fn run_step(
        bound: &BoundStep,
        input: &Arc<serde_json::Value>,
        output: &Arc<Output>,
        pool: &mut Vec<String>,
        flow: &mut Flow,
    ) -> Result<(), EngineError> {
        let targets: Vec<StepTarget> = match bound.step.kind() {
            StepKind::PerObject => pool
                .iter()
                .filter_map(|uid| output.index().get(uid))
                .map(StepTarget::Object)
                .collect(),
            StepKind::RawInput => vec![StepTarget::RawInput],
            StepKind::Payload => vec![StepTarget::Payload],
        };

        for target in targets {
            if flow.halted() {
                break;
            }
            // An earlier target of this step may have emptied the pool
            // or discarded this one.
            if let StepTarget::Object(object) = &target {
                if !pool.iter().any(|uid| uid == object.uid()) {
                    continue;
                }
            }

            let scope = StepScope::new(target, input.clone(), output.clone());
            if !bound.step.accepts(&scope) {
                tracing::debug!(
                    step = bound.step.name(),
                    target = ?scope.target(),
                    "target skipped by activation predicate"
                );
                continue;
            }

            let outcome = Self::execute_step(bound, &scope).await?;
            let effects = Self::evaluate_outcome(bound, &scope, outcome, output);
            Self::apply_effects(&scope, effects, pool, flow);
        }
        Ok(())
    }

    /// Executes the step through its resilience chain, routing a
    /// failure through its recovery chain; a recovered outcome is
    /// evaluated as if produced normally.
    async fn execute_step(
        bound: &BoundStep,
        scope: &StepScope,
    ) -> Result<StepOutcome, EngineError> {
        let step = bound.step.clone();
        let scope_handle = scope.clone();
        let operation: Operation<StepOutcome> = Arc::new(move || {
            let step = step.clone();
            let scope = scope_handle.clone();
            async move { step.execute(&scope).await }.boxed()
        });

        match bound.resilience.invoke(bound.step.name(), operation).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                tracing::debug!(step = bound.step.name(), error = %error, "step failed");
                bound
                    .recovery
                    .apply(error, scope)
                    .await
                    .map_err(|e| EngineError::Step {
                        step: bound.step.name().to_string(),
                        source: Box::new(e),
                    })
            }
        }
    }

    /// Evaluates a batch member-by-member, registering results as it
    /// goes and accumulating pool/flow effects to apply afterwards
    /// (register-then-apply).
    fn evaluate_outcome(
        bound: &BoundStep,
        scope: &StepScope,
        outcome: StepOutcome,
        output: &Arc<Output>,
    ) -> PendingEffects {
        let owner = scope.target().owner_uid(output.uid()).to_string();
        let mut effects = PendingEffects::default();

        for result in outcome.into_vec() {
            let strategy = bound.evaluator.evaluate(&result, scope.target(), scope);
            let behaviours = strategy.behaviours();
            tracing::debug!(
                step = bound.step.name(),
                owner = %owner,
                kind = result.kind(),
                strategy = %strategy,
                "result evaluated"
            );

            if behaviours.register_result {
                output.results().register(ResultDescriptor::new(
                    owner.clone(),
                    bound.step.name(),
                    result,
                ));
            }
            effects.discard_current |= behaviours.discard_current;
            effects.discard_all |= behaviours.discard_all;
            effects.flow.stop_ordinary |= behaviours.stop_current;
            effects.flow.stop_all |= behaviours.stop_all;
            effects.flow.exit |= behaviours.exit_pipeline;
        }
        effects
    }

    fn apply_effects(
        scope: &StepScope,
        effects: PendingEffects,
        pool: &mut Vec<String>,
        flow: &mut Flow,
    ) {
        if effects.discard_all {
            pool.clear();
        } else if effects.discard_current {
            if let StepTarget::Object(object) = scope.target() {
                pool.retain(|uid| uid != object.uid());
            }
        }
        flow.stop_ordinary |= effects.flow.stop_ordinary;
        flow.stop_all |= effects.flow.stop_all;
        flow.exit |= effects.flow.exit;
    }

    /// Dispatches sinks in declaration order: concurrent sinks are
    /// spawned, synchronous sinks run inline. All spawned sinks are
    /// joined before this returns, even when a synchronous sink failed
    /// and aborted the remaining sequence.
    async fn run_sinks(&self, output: &Arc<Output>) -> Result<(), EngineError> {
        let mut handles = Vec::new();
        let mut sync_failure = None;

        for bound in &self.sinks {
            match bound.sink.mode() {
                SinkMode::Concurrent => {
                    let bound = bound.clone();
                    let output = output.clone();
                    handles.push(tokio::spawn(
                        async move {
                            if let Err(error) = Self::run_sink(&bound, &output).await {
                                tracing::warn!(
                                    sink = bound.sink.name(),
                                    error = %error,
                                    "concurrent sink failed"
                                );
                            }
                        }
                        .instrument(tracing::Span::current()),
                    ));
                }
                SinkMode::Sync => {
                    if let Err(error) = Self::run_sink(bound, output).await {
                        sync_failure = Some(EngineError::Sink {
                            sink: bound.sink.name().to_string(),
                            source: Box::new(error),
                        });
                        break;
                    }
                }
            }
        }

        for handle in handles {
            handle
                .await
                .map_err(|e| EngineError::Join(e.to_string()))?;
        }
        match sync_failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn run_sink(bound: &BoundSink, output: &Arc<Output>) -> Result<(), EngineError> {
        let sink = bound.sink.clone();
        let output_handle = output.clone();
        let operation: Operation<()> = Arc::new(move || {
            let sink = sink.clone();
            let output = output_handle.clone();
            async move { sink.process(&output).await }.boxed()
        });

        match bound.resilience.invoke(bound.sink.name(), operation).await {
            Ok(()) => {
                tracing::debug!(sink = bound.sink.name(), "sink completed");
                Ok(())
            }
            Err(error) => bound.recovery.apply(error, output).await,
        }
    }
}
