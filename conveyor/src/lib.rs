//! # Conveyor
//!
//! An in-process execution engine for multi-stage processing pipelines:
//! a bounded sequence of steps applied to a working pool of uniquely
//! identified domain objects, followed by sinks that observe the final
//! state.
//!
//! - **Step-execution state machine**: after every step execution a
//!   result evaluator picks one of six strategies controlling what gets
//!   recorded, which objects stay in the pool, and whether remaining
//!   steps or sinks still run.
//! - **Generation-aware result log**: every step's output is recorded
//!   against the object it was produced for, with per-object scoped
//!   views and a "what did this run produce" vs "all inherited history"
//!   distinction across nested parent/child runs.
//! - **Sinks and resilience**: synchronous and concurrent sinks over
//!   the finished output, with circuit-breaker, retry, and time-limit
//!   decorators composable over steps and sinks alike.
//! - **Error handler chains**: per-component ordered fallbacks with a
//!   default-rethrow contract.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use conveyor::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("scoring")
//!     .indexer(Arc::new(order_indexer))
//!     .step(Arc::new(FnStep::new("score", score_order)))
//!     .sink(Arc::new(FnSink::new("report", report)))
//!     .build()?;
//!
//! let output = pipeline.run(input).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod recovery;
pub mod resilience;
pub mod sink;
pub mod step;

/// Commonly used types, re-exported for convenience.
pub mod prelude {
    pub use crate::context::Context;
    pub use crate::core::{
        AnyPayload, IndexContainer, IndexEntry, Indexable, Output, OutputTag, ResultContainer,
        ResultDescriptor, ResultView, StepOutcome, StepResult,
    };
    pub use crate::errors::{EngineError, ErrorKind};
    pub use crate::pipeline::{
        BoundSink, BoundStep, FnIndexer, FnInitializer, IndexSource, Indexer, IndexerKind,
        Initializer, PassThroughInitializer, Pipeline, PipelineBuilder,
    };
    pub use crate::recovery::{
        InitRecovery, RecoveryChain, RethrowUnless, RunRecovery, SinkRecovery, StepRecovery,
    };
    pub use crate::resilience::{
        BackoffStrategy, BreakerConfig, CircuitBreaker, JitterStrategy, ResilienceChain,
        ResiliencePolicy, RetryConfig, RetryListener, RetryPolicy,
    };
    pub use crate::sink::{CollectingSink, FnSink, Sink, SinkMode};
    pub use crate::step::{
        ContinueEvaluator, FnEvaluator, FnStep, ResultEvaluator, Step, StepKind, StepScope,
        StepStrategy, StepTarget, StrategyBehaviours, SubPipelineStep,
    };
}
