//! Pipeline construction and execution.
//!
//! This module provides:
//! - Initializer and indexer contracts
//! - Pipeline builder with validation
//! - The step-execution state machine and sink dispatch

mod builder;
mod executor;
mod init;

#[cfg(test)]
mod integration_tests;

pub use builder::{BoundSink, BoundStep, Pipeline, PipelineBuilder};
pub use init::{
    FnIndexer, FnInitializer, IndexSource, Indexer, IndexerKind, Initializer,
    PassThroughInitializer,
};
