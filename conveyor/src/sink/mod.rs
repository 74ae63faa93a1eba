//! Sinks observe the finished output of a run.
//!
//! Synchronous sinks run on the caller's task in declaration order;
//! concurrent sinks are dispatched to their own tasks and joined before
//! the run returns.

use crate::core::Output;
use crate::errors::EngineError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Whether a sink runs inline or on its own task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// On the caller's task, in declaration order.
    #[default]
    Sync,
    /// On its own task, joined before the run returns.
    Concurrent,
}

/// Trait for post-processing hooks over the finished output.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Returns the sink's name.
    fn name(&self) -> &str;

    /// Returns how the sink is dispatched.
    fn mode(&self) -> SinkMode {
        SinkMode::Sync
    }

    /// Processes the finished output.
    async fn process(&self, output: &Arc<Output>) -> Result<(), EngineError>;
}

/// A closure-based sink.
pub struct FnSink<F>
where
    F: Fn(&Arc<Output>) -> Result<(), EngineError> + Send + Sync,
{
    name: String,
    mode: SinkMode,
    func: F,
}

impl<F> FnSink<F>
where
    F: Fn(&Arc<Output>) -> Result<(), EngineError> + Send + Sync,
{
    /// Creates a synchronous sink from a closure.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            mode: SinkMode::Sync,
            func,
        }
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SinkMode) -> Self {
        self.mode = mode;
        self
    }
}

impl<F> std::fmt::Debug for FnSink<F>
where
    F: Fn(&Arc<Output>) -> Result<(), EngineError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

#[async_trait]
impl<F> Sink for FnSink<F>
where
    F: Fn(&Arc<Output>) -> Result<(), EngineError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        self.mode
    }

    async fn process(&self, output: &Arc<Output>) -> Result<(), EngineError> {
        (self.func)(output)
    }
}

/// A sink that records the uids of the outputs it saw. For tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    name: String,
    mode: SinkMode,
    seen: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// Creates a collecting sink.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: SinkMode::Sync,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Sets the dispatch mode.
    #[must_use]
    pub fn with_mode(mut self, mode: SinkMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the uids of the outputs processed so far.
    #[must_use]
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    /// Returns how many outputs were processed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true if nothing was processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

#[async_trait]
impl Sink for CollectingSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> SinkMode {
        self.mode
    }

    async fn process(&self, output: &Arc<Output>) -> Result<(), EngineError> {
        self.seen.lock().push(output.uid().to_string());
        Ok(())
    }
}
