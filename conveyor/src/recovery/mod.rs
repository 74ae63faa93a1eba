//! Per-component error handler chains.
//!
//! Handlers are ordered fallbacks, not nested try/catch: the first
//! handler receives the original error; a handler that fails passes its
//! *new* error to the next one; a handler that succeeds short-circuits
//! with a substitute value. An empty chain rethrows.

use crate::context::Context;
use crate::core::{AnyPayload, Output, StepOutcome};
use crate::errors::{EngineError, ErrorKind};
use crate::step::StepScope;
use async_trait::async_trait;
use std::sync::Arc;

/// Recovers a failed step by producing a substitute outcome.
#[async_trait]
pub trait StepRecovery: Send + Sync {
    /// Handles the error or re-raises (possibly transformed).
    async fn recover(
        &self,
        error: EngineError,
        scope: &StepScope,
    ) -> Result<StepOutcome, EngineError>;
}

/// Recovers a failed sink by absorbing the failure.
#[async_trait]
pub trait SinkRecovery: Send + Sync {
    /// Handles the error or re-raises (possibly transformed).
    async fn recover(&self, error: EngineError, output: &Arc<Output>) -> Result<(), EngineError>;
}

/// Recovers a failed initializer by producing a substitute payload.
#[async_trait]
pub trait InitRecovery: Send + Sync {
    /// Handles the error or re-raises (possibly transformed).
    async fn recover(
        &self,
        error: EngineError,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError>;
}

/// Recovers a failed run by producing a substitute output, given the
/// best-effort previous output, the input, and the context.
#[async_trait]
pub trait RunRecovery: Send + Sync {
    /// Handles the error or re-raises (possibly transformed).
    async fn recover(
        &self,
        error: EngineError,
        previous: Option<Arc<Output>>,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<Arc<Output>, EngineError>;
}

/// An ordered fallback list of handlers for one component kind.
pub struct RecoveryChain<H: ?Sized> {
    handlers: Vec<Arc<H>>,
}

impl<H: ?Sized> RecoveryChain<H> {
    /// Creates an empty, rethrowing chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Appends a fallback handler.
    #[must_use]
    pub fn and_then(mut self, handler: Arc<H>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Returns true if the chain rethrows unconditionally.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<H: ?Sized> Default for RecoveryChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ?Sized> Clone for RecoveryChain<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: ?Sized> std::fmt::Debug for RecoveryChain<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl RecoveryChain<dyn StepRecovery> {
    /// Runs the fallbacks in order against a step failure.
    ///
    /// # Errors
    ///
    /// Returns the last unhandled error when every handler re-raises.
    pub async fn apply(
        &self,
        error: EngineError,
        scope: &StepScope,
    ) -> Result<StepOutcome, EngineError> {
        let mut error = error;
        for handler in &self.handlers {
            match handler.recover(error, scope).await {
                Ok(outcome) => return Ok(outcome),
                Err(next) => error = next,
            }
        }
        Err(error)
    }
}

impl RecoveryChain<dyn SinkRecovery> {
    /// Runs the fallbacks in order against a sink failure.
    ///
    /// # Errors
    ///
    /// Returns the last unhandled error when every handler re-raises.
    pub async fn apply(
        &self,
        error: EngineError,
        output: &Arc<Output>,
    ) -> Result<(), EngineError> {
        let mut error = error;
        for handler in &self.handlers {
            match handler.recover(error, output).await {
                Ok(()) => return Ok(()),
                Err(next) => error = next,
            }
        }
        Err(error)
    }
}

impl RecoveryChain<dyn InitRecovery> {
    /// Runs the fallbacks in order against an initializer failure.
    ///
    /// # Errors
    ///
    /// Returns the last unhandled error when every handler re-raises.
    pub async fn apply(
        &self,
        error: EngineError,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError> {
        let mut error = error;
        for handler in &self.handlers {
            match handler.recover(error, input, ctx).await {
                Ok(payload) => return Ok(payload),
                Err(next) => error = next,
            }
        }
        Err(error)
    }
}

impl RecoveryChain<dyn RunRecovery> {
    /// Runs the fallbacks in order against a run failure.
    ///
    /// # Errors
    ///
    /// Returns the last unhandled error when every handler re-raises.
    pub async fn apply(
        &self,
        error: EngineError,
        previous: Option<Arc<Output>>,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<Arc<Output>, EngineError> {
        let mut error = error;
        for handler in &self.handlers {
            match handler.recover(error, previous.clone(), input, ctx).await {
                Ok(output) => return Ok(output),
                Err(next) => error = next,
            }
        }
        Err(error)
    }
}

/// A policy that rethrows unless the error's kind is in an explicit
/// allow-list, in which case a wrapped handler runs.
pub struct RethrowUnless<H: ?Sized> {
    kinds: Vec<ErrorKind>,
    inner: Arc<H>,
}

impl<H: ?Sized> RethrowUnless<H> {
    /// Creates the policy around a handler.
    #[must_use]
    pub fn new(kinds: Vec<ErrorKind>, inner: Arc<H>) -> Self {
        Self { kinds, inner }
    }

    fn allows(&self, error: &EngineError) -> bool {
        self.kinds.contains(&error.kind())
    }
}

#[async_trait]
impl StepRecovery for RethrowUnless<dyn StepRecovery> {
    async fn recover(
        &self,
        error: EngineError,
        scope: &StepScope,
    ) -> Result<StepOutcome, EngineError> {
        if self.allows(&error) {
            self.inner.recover(error, scope).await
        } else {
            Err(error)
        }
    }
}

#[async_trait]
impl SinkRecovery for RethrowUnless<dyn SinkRecovery> {
    async fn recover(&self, error: EngineError, output: &Arc<Output>) -> Result<(), EngineError> {
        if self.allows(&error) {
            self.inner.recover(error, output).await
        } else {
            Err(error)
        }
    }
}

#[async_trait]
impl InitRecovery for RethrowUnless<dyn InitRecovery> {
    async fn recover(
        &self,
        error: EngineError,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError> {
        if self.allows(&error) {
            self.inner.recover(error, input, ctx).await
        } else {
            Err(error)
        }
    }
}

#[async_trait]
impl RunRecovery for RethrowUnless<dyn RunRecovery> {
    async fn recover(
        &self,
        error: EngineError,
        previous: Option<Arc<Output>>,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<Arc<Output>, EngineError> {
        if self.allows(&error) {
            self.inner.recover(error, previous, input, ctx).await
        } else {
            Err(error)
        }
    }
}
