//! End-to-end runs through the builder, executor, sinks, recovery, and
//! resilience layers.

use crate::prelude::*;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Item {
    id: String,
}

impl Item {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self { id: id.to_string() })
    }
}

impl Indexable for Item {
    fn uid(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Seeds the pool from a raw-input array of uid strings.
fn uid_indexer() -> Arc<dyn Indexer> {
    Arc::new(
        FnIndexer::new(|source| {
            let IndexSource::RawInput(value) = source else {
                return Err(EngineError::business("expected raw input"));
            };
            let uids = value
                .as_array()
                .ok_or_else(|| EngineError::business("expected a uid array"))?;
            Ok(uids
                .iter()
                .filter_map(|v| v.as_str())
                .map(|uid| IndexEntry::new(Item::new(uid)))
                .collect())
        })
        .raw_input(),
    )
}

/// A per-object step whose result kind equals its name.
fn recording_step(name: &'static str) -> Arc<dyn Step> {
    Arc::new(FnStep::new(name, move |_scope| {
        Ok(StepOutcome::one(StepResult::empty(name)))
    }))
}

/// A raw-input step whose result kind equals its name.
fn global_step(name: &'static str) -> Arc<dyn Step> {
    Arc::new(
        FnStep::new(name, move |_scope| {
            Ok(StepOutcome::one(StepResult::empty(name)))
        })
        .with_kind(StepKind::RawInput),
    )
}

fn always(strategy: StepStrategy) -> Arc<dyn ResultEvaluator> {
    Arc::new(FnEvaluator::new(move |_result, _target, _scope| strategy))
}

fn components(output: &Arc<Output>, uid: &str) -> Vec<String> {
    output
        .results()
        .of(uid)
        .stream()
        .iter()
        .map(|d| d.component().to_string())
        .collect()
}

#[tokio::test]
async fn test_per_object_divergence() {
    // step2 discards o2 from the pool; o1 keeps going.
    let discard_o2 = FnEvaluator::new(|_result, target: &StepTarget, _scope: &StepScope| {
        match target.object() {
            Some(object) if object.uid() == "o2" => StepStrategy::DiscardAndContinue,
            _ => StepStrategy::Continue,
        }
    });

    let pipeline = PipelineBuilder::new("divergence")
        .indexer(uid_indexer())
        .step(recording_step("step1"))
        .bound_step(BoundStep::new(recording_step("step2")).evaluated_by(Arc::new(discard_o2)))
        .step(recording_step("step3"))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(["o1", "o2"]))).await.unwrap();

    assert_eq!(components(&output, "o1"), vec!["step1", "step2", "step3"]);
    assert_eq!(components(&output, "o2"), vec!["step1", "step2"]);
}

fn stop_pipeline(strategy: StepStrategy) -> Pipeline {
    PipelineBuilder::new("early-termination")
        .indexer(uid_indexer())
        .step(global_step("a"))
        .bound_step(BoundStep::new(global_step("b")).evaluated_by(always(strategy)))
        .step(global_step("d"))
        .step(Arc::new(
            FnStep::new("c", |_scope| Ok(StepOutcome::one(StepResult::empty("c"))))
                .with_kind(StepKind::Payload)
                .pin(),
        ))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_pinned_step_survives_stop() {
    let pipeline = stop_pipeline(StepStrategy::Stop);
    let output = pipeline.run(Arc::new(json!([]))).await.unwrap();

    // The ordinary step after the stop is skipped; the pinned one runs.
    assert_eq!(components(&output, output.uid()), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_pinned_step_halted_by_abort() {
    let pipeline = stop_pipeline(StepStrategy::Abort);
    let output = pipeline.run(Arc::new(json!([]))).await.unwrap();

    assert_eq!(components(&output, output.uid()), vec!["a", "b"]);
}

#[tokio::test]
async fn test_stop_empties_pool_for_pinned_per_object_steps() {
    let pipeline = PipelineBuilder::new("stop-pool")
        .indexer(uid_indexer())
        .bound_step(BoundStep::new(global_step("halt")).evaluated_by(always(StepStrategy::Stop)))
        .bound_step(BoundStep::new(Arc::new(
            FnStep::new("cleanup", |_scope| {
                Ok(StepOutcome::one(StepResult::empty("cleanup")))
            })
            .pin(),
        )))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(["o1"]))).await.unwrap();

    // The pinned step still executes, but STOP discarded every pool
    // member, so the per-object cleanup had no targets left.
    assert!(components(&output, "o1").is_empty());
    assert_eq!(components(&output, output.uid()), vec!["halt"]);
}

#[tokio::test]
async fn test_exit_skips_sinks() {
    let sync_sink = Arc::new(CollectingSink::new("sync"));
    let concurrent_sink = Arc::new(CollectingSink::new("concurrent").with_mode(SinkMode::Concurrent));

    let pipeline = PipelineBuilder::new("exit")
        .bound_step(BoundStep::new(global_step("bail")).evaluated_by(always(StepStrategy::Exit)))
        .sink(sync_sink.clone())
        .sink(concurrent_sink.clone())
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();

    assert!(output.finished_at().is_some());
    assert_eq!(components(&output, output.uid()), vec!["bail"]);
    assert!(sync_sink.is_empty());
    assert!(concurrent_sink.is_empty());
}

#[tokio::test]
async fn test_exit_mid_batch_registers_remaining_members() {
    let batch = Arc::new(
        FnStep::new("batch", |_scope| {
            Ok(StepOutcome::many(vec![
                StepResult::empty("halt"),
                StepResult::empty("tail"),
            ]))
        })
        .with_kind(StepKind::RawInput),
    );
    let exit_on_halt = FnEvaluator::new(|result: &StepResult, _target, _scope| {
        if result.is("halt") {
            StepStrategy::Exit
        } else {
            StepStrategy::Continue
        }
    });

    let sink = Arc::new(CollectingSink::new("observer"));
    let pipeline = PipelineBuilder::new("mid-batch-exit")
        .bound_step(BoundStep::new(batch).evaluated_by(Arc::new(exit_on_halt)))
        .sink(sink.clone())
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();

    // Register-then-apply: the member after the EXIT is still recorded.
    let view = output.results().of(output.uid());
    assert_eq!(view.stream_of("halt").len(), 1);
    assert_eq!(view.stream_of("tail").len(), 1);
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_skip_computes_but_never_records() {
    let pipeline = PipelineBuilder::new("skip")
        .indexer(uid_indexer())
        .bound_step(BoundStep::new(recording_step("probe")).evaluated_by(always(StepStrategy::Skip)))
        .step(recording_step("keep"))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(["o1"]))).await.unwrap();

    // No record from the skipped result, no pool effect either.
    assert_eq!(components(&output, "o1"), vec!["keep"]);
}

struct PickyStep;

#[async_trait]
impl Step for PickyStep {
    fn name(&self) -> &str {
        "picky"
    }

    fn accepts(&self, scope: &StepScope) -> bool {
        scope.target().object().is_some_and(|o| o.uid() == "o1")
    }

    async fn execute(&self, _scope: &StepScope) -> Result<StepOutcome, EngineError> {
        Ok(StepOutcome::one(StepResult::empty("picky")))
    }
}

#[tokio::test]
async fn test_activation_predicate_skips_silently() {
    let pipeline = PipelineBuilder::new("predicate")
        .indexer(uid_indexer())
        .step(Arc::new(PickyStep))
        .step(recording_step("after"))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(["o1", "o2"]))).await.unwrap();

    assert_eq!(components(&output, "o1"), vec!["picky", "after"]);
    // o2 was never executed by the picky step, yet stayed in the pool.
    assert_eq!(components(&output, "o2"), vec!["after"]);
}

#[derive(Default)]
struct CountingListener {
    retries: AtomicUsize,
    successes: AtomicUsize,
}

impl RetryListener for CountingListener {
    fn on_retry(&self, _attempt: usize, _error: &EngineError) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self, _attempts: usize) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_retry_wrapped_step_recovers_within_budget() {
    let calls = Arc::new(AtomicUsize::new(0));
    let step_calls = calls.clone();
    let flaky = Arc::new(
        FnStep::new("flaky", move |_scope| {
            let n = step_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 4 {
                Err(EngineError::business(format!("attempt {n} failed")))
            } else {
                Ok(StepOutcome::one(StepResult::empty("settled")))
            }
        })
        .with_kind(StepKind::RawInput),
    );

    let listener = Arc::new(CountingListener::default());
    let retry = RetryPolicy::new(
        RetryConfig::new()
            .with_max_attempts(5)
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None),
    )
    .with_listener(listener.clone());

    let pipeline = PipelineBuilder::new("retry")
        .bound_step(BoundStep::new(flaky).wrapped_in(ResilienceChain::new().retry(retry)))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();

    assert_eq!(components(&output, output.uid()), vec!["flaky"]);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(listener.retries.load(Ordering::SeqCst), 4);
    assert_eq!(listener.successes.load(Ordering::SeqCst), 1);
}

struct SleepyStep;

#[async_trait]
impl Step for SleepyStep {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn kind(&self) -> StepKind {
        StepKind::RawInput
    }

    async fn execute(&self, _scope: &StepScope) -> Result<StepOutcome, EngineError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(StepOutcome::one(StepResult::empty("too-late")))
    }
}

struct SubstituteOutcome(&'static str);

#[async_trait]
impl StepRecovery for SubstituteOutcome {
    async fn recover(
        &self,
        _error: EngineError,
        _scope: &StepScope,
    ) -> Result<StepOutcome, EngineError> {
        Ok(StepOutcome::one(StepResult::empty(self.0)))
    }
}

#[tokio::test]
async fn test_timeout_recovered_by_allow_list() {
    let recovery = RecoveryChain::<dyn StepRecovery>::new().and_then(Arc::new(
        RethrowUnless::<dyn StepRecovery>::new(
            vec![ErrorKind::Timeout],
            Arc::new(SubstituteOutcome("deadline-fallback")),
        ),
    ));

    let pipeline = PipelineBuilder::new("deadline")
        .bound_step(
            BoundStep::new(Arc::new(SleepyStep))
                .wrapped_in(ResilienceChain::new().time_limit(Duration::from_millis(20)))
                .recovered_by(recovery),
        )
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();

    let view = output.results().of(output.uid());
    assert_eq!(view.stream_of("deadline-fallback").len(), 1);
    assert!(view.stream_of("too-late").is_empty());
}

#[tokio::test]
async fn test_sync_sink_failure_aborts_remaining_sequence() {
    let failing = Arc::new(FnSink::new("boom", |_output| {
        Err(EngineError::business("sink blew up"))
    }));
    let later = Arc::new(CollectingSink::new("later"));

    let pipeline = PipelineBuilder::new("sink-abort")
        .step(global_step("work"))
        .sink(failing)
        .sink(later.clone())
        .build()
        .unwrap();

    let error = pipeline.run(Arc::new(json!(null))).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Pipeline);
    assert!(error.to_string().contains("sink-abort"));
    assert!(later.is_empty());
}

#[tokio::test]
async fn test_concurrent_sink_failure_is_confined() {
    let failing = Arc::new(
        FnSink::new("boom", |_output| Err(EngineError::business("sink blew up")))
            .with_mode(SinkMode::Concurrent),
    );
    let sibling = Arc::new(CollectingSink::new("sibling").with_mode(SinkMode::Concurrent));
    let trailing = Arc::new(CollectingSink::new("trailing"));

    let pipeline = PipelineBuilder::new("confined")
        .step(global_step("work"))
        .sink(failing)
        .sink(sibling.clone())
        .sink(trailing.clone())
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();

    assert_eq!(sibling.seen(), vec![output.uid().to_string()]);
    assert_eq!(trailing.seen(), vec![output.uid().to_string()]);
}

struct FallbackPayload;

#[async_trait]
impl InitRecovery for FallbackPayload {
    async fn recover(
        &self,
        _error: EngineError,
        _input: &Arc<serde_json::Value>,
        _ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError> {
        Ok(Arc::new("fallback".to_string()))
    }
}

#[tokio::test]
async fn test_initializer_recovery_substitutes_payload() {
    let initializer = Arc::new(FnInitializer::new(|_input, _ctx| {
        Err(EngineError::business("cannot parse input"))
    }));
    let read_payload = Arc::new(
        FnStep::new("read", |scope: &StepScope| {
            let payload = scope.payload_as::<String>()?;
            Ok(StepOutcome::one(StepResult::new(
                "payload",
                json!(*payload),
            )))
        })
        .with_kind(StepKind::Payload),
    );

    let pipeline = PipelineBuilder::new("init-recovery")
        .initializer(initializer)
        .init_recovery(RecoveryChain::<dyn InitRecovery>::new().and_then(Arc::new(FallbackPayload)))
        .step(read_payload)
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!("garbage"))).await.unwrap();

    let recorded = output
        .results()
        .of(output.uid())
        .latest("payload")
        .unwrap();
    assert_eq!(recorded.result().value(), &json!("fallback"));
}

struct FallbackRun;

#[async_trait]
impl RunRecovery for FallbackRun {
    async fn recover(
        &self,
        _error: EngineError,
        previous: Option<Arc<Output>>,
        _input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<Arc<Output>, EngineError> {
        // The failed run's best-effort output is available here.
        assert!(previous.is_some());
        Ok(Output::new(
            OutputTag::new("fallback", "recovery"),
            Arc::new(()),
            ctx.clone(),
        ))
    }
}

#[tokio::test]
async fn test_run_recovery_substitutes_output() {
    let doomed = Arc::new(
        FnStep::new("doomed", |_scope| {
            Err(EngineError::business("unrecoverable"))
        })
        .with_kind(StepKind::RawInput),
    );

    let pipeline = PipelineBuilder::new("run-recovery")
        .step(doomed)
        .run_recovery(RecoveryChain::<dyn RunRecovery>::new().and_then(Arc::new(FallbackRun)))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();
    assert_eq!(output.tag().pipeline, "fallback");
}

#[tokio::test]
async fn test_unrecovered_failure_surfaces_as_pipeline_error() {
    let doomed = Arc::new(
        FnStep::new("doomed", |_scope| {
            Err(EngineError::business("unrecoverable"))
        })
        .with_kind(StepKind::RawInput),
    );

    let pipeline = PipelineBuilder::new("doomed-run").step(doomed).build().unwrap();
    let error = pipeline.run(Arc::new(json!(null))).await.unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Pipeline);
    assert!(error.to_string().contains("doomed-run"));
    let mut cause: &dyn std::error::Error = &error;
    let mut found = false;
    while let Some(source) = cause.source() {
        if source.to_string().contains("unrecoverable") {
            found = true;
        }
        cause = source;
    }
    assert!(found);
}

#[tokio::test]
async fn test_nested_pipeline_inherits_parent_generation() {
    let inner = Arc::new(
        PipelineBuilder::new("inner")
            .step(global_step("inner-note"))
            .build()
            .unwrap(),
    );

    let compose = SubPipelineStep::new("compose", inner).with_mapper(|nested: &Arc<Output>| {
        let view = nested.result_view();
        StepResult::new(
            "nested",
            json!({
                "inherited": view.stream().len() - view.current().len(),
                "current": view.current().len(),
            }),
        )
    });

    let pipeline = PipelineBuilder::new("outer")
        .step(global_step("parent-note"))
        .step(Arc::new(compose))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(null))).await.unwrap();

    let nested = output
        .results()
        .of(output.uid())
        .latest("nested")
        .unwrap();
    // The child saw the parent's earlier descriptor as inherited
    // history and its own work as the current generation.
    assert_eq!(nested.result().value(), &json!({"inherited": 1, "current": 1}));
}

#[tokio::test]
async fn test_discard_all_and_continue_still_runs_global_steps() {
    let pipeline = PipelineBuilder::new("drain")
        .indexer(uid_indexer())
        .bound_step(
            BoundStep::new(recording_step("first"))
                .evaluated_by(always(StepStrategy::DiscardAndContinue)),
        )
        .step(recording_step("second"))
        .step(global_step("summary"))
        .build()
        .unwrap();

    let output = pipeline.run(Arc::new(json!(["o1", "o2"]))).await.unwrap();

    // Every object was discarded one by one, so the second per-object
    // step had no targets, but the global step still ran.
    assert_eq!(components(&output, "o1"), vec!["first"]);
    assert_eq!(components(&output, "o2"), vec!["first"]);
    assert_eq!(components(&output, output.uid()), vec!["summary"]);
}
