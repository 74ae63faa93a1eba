//! Error types for the conveyor engine.
//!
//! One enum covers the whole taxonomy: structural failures (bad
//! configuration, type mismatches), wrapper-induced failures (circuit
//! open, retries exhausted, timeout), and business failures raised by
//! user-supplied step/sink/initializer logic.

use thiserror::Error;

/// The main error type for conveyor operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An argument was missing or malformed (e.g. an empty uid).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A typed lookup found an object of a different declared type.
    #[error("Type mismatch for '{uid}': stored {stored}, requested {requested}")]
    TypeMismatch {
        /// The uid that was looked up.
        uid: String,
        /// The declared type recorded at indexing time.
        stored: String,
        /// The type the caller asked for.
        requested: String,
    },

    /// The pipeline configuration is structurally invalid.
    #[error("Pipeline validation error: {0}")]
    Validation(String),

    /// A circuit breaker refused the call because it is open.
    #[error("Circuit breaker open for '{component}'")]
    CircuitOpen {
        /// The wrapped component's name.
        component: String,
    },

    /// A retry wrapper gave up after exhausting its attempts.
    #[error("Retries exhausted for '{component}' after {attempts} attempts")]
    RetriesExhausted {
        /// The wrapped component's name.
        component: String,
        /// Total attempts made, including the first.
        attempts: usize,
        /// The final failure.
        #[source]
        source: Box<EngineError>,
    },

    /// A time limiter cancelled the call past its deadline.
    #[error("Time limit of {limit_ms}ms exceeded for '{component}'")]
    Timeout {
        /// The wrapped component's name.
        component: String,
        /// The configured wall-time limit in milliseconds.
        limit_ms: u64,
    },

    /// A step failed and no handler recovered it.
    #[error("Step '{step}' failed: {source}")]
    Step {
        /// The step name.
        step: String,
        /// The underlying failure.
        #[source]
        source: Box<EngineError>,
    },

    /// A synchronous sink failed and no handler recovered it.
    #[error("Sink '{sink}' failed: {source}")]
    Sink {
        /// The sink name.
        sink: String,
        /// The underlying failure.
        #[source]
        source: Box<EngineError>,
    },

    /// The initializer failed and no handler recovered it.
    #[error("Initializer failed: {source}")]
    Initializer {
        /// The underlying failure.
        #[source]
        source: Box<EngineError>,
    },

    /// A run failed; wraps the original cause for the caller.
    #[error("Pipeline '{pipeline}' failed: {source}")]
    Pipeline {
        /// The pipeline name.
        pipeline: String,
        /// The underlying failure.
        #[source]
        source: Box<EngineError>,
    },

    /// A spawned task could not be joined.
    #[error("Task join error: {0}")]
    Join(String),

    /// A business failure from user-supplied logic.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Stable discriminant for [`EngineError`], used by allow-list recovery
/// policies to match on failure kinds without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed argument.
    InvalidArgument,
    /// Typed lookup mismatch.
    TypeMismatch,
    /// Structurally invalid pipeline configuration.
    Validation,
    /// Circuit breaker open.
    CircuitOpen,
    /// Retry attempts exhausted.
    RetriesExhausted,
    /// Deadline exceeded.
    Timeout,
    /// Unrecovered step failure.
    Step,
    /// Unrecovered sink failure.
    Sink,
    /// Unrecovered initializer failure.
    Initializer,
    /// Unrecovered run failure.
    Pipeline,
    /// Task join failure.
    Join,
    /// Business failure from user logic.
    Other,
}

impl EngineError {
    /// Returns the stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::Validation(_) => ErrorKind::Validation,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Step { .. } => ErrorKind::Step,
            Self::Sink { .. } => ErrorKind::Sink,
            Self::Initializer { .. } => ErrorKind::Initializer,
            Self::Pipeline { .. } => ErrorKind::Pipeline,
            Self::Join(_) => ErrorKind::Join,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Creates a business failure from a plain message.
    #[must_use]
    pub fn business(message: impl Into<String>) -> Self {
        Self::Other(anyhow::anyhow!(message.into()))
    }
}
