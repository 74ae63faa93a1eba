//! The per-run output: identity, payload, index, and results.

use super::{IndexContainer, ResultContainer, ResultView};
use crate::context::Context;
use crate::errors::EngineError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::Any;
use std::sync::Arc;
use uuid::Uuid;

/// The payload produced by an initializer, type-erased so steps of any
/// domain share one engine.
pub type AnyPayload = Arc<dyn Any + Send + Sync>;

/// Identity of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputTag {
    /// The run's unique identifier.
    pub uid: String,
    /// The pipeline that produced the run.
    pub pipeline: String,
    /// Who requested the run.
    pub author: String,
}

impl OutputTag {
    /// Creates a tag with a fresh uid.
    #[must_use]
    pub fn new(pipeline: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            pipeline: pipeline.into(),
            author: author.into(),
        }
    }

    /// Overrides the generated uid.
    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = uid.into();
        self
    }
}

/// The state of one run: tag, payload, index container, result
/// container, and the context it was started with.
///
/// Identity, equality, and ordering are defined solely by `tag.uid`.
/// Created once per run and never replaced; its containers are mutated
/// only additively during the run.
pub struct Output {
    tag: OutputTag,
    created_at: DateTime<Utc>,
    finished_at: RwLock<Option<DateTime<Utc>>>,
    payload: AnyPayload,
    index: Arc<IndexContainer>,
    results: Arc<ResultContainer>,
    context: Arc<Context>,
}

impl Output {
    /// Creates a run output around an initializer payload.
    ///
    /// If the context references a parent output, the new result
    /// container immediately registers the parent's results, so the
    /// inherited descriptors stay outside this run's generation.
    #[must_use]
    pub fn new(tag: OutputTag, payload: AnyPayload, context: Arc<Context>) -> Arc<Self> {
        let results = Arc::new(ResultContainer::new());
        if let Some(parent) = context.parent_output() {
            results.register_container(parent.results());
        }

        Arc::new(Self {
            tag,
            created_at: Utc::now(),
            finished_at: RwLock::new(None),
            payload,
            index: Arc::new(IndexContainer::new()),
            results,
            context,
        })
    }

    /// Returns the run's tag.
    #[must_use]
    pub fn tag(&self) -> &OutputTag {
        &self.tag
    }

    /// Returns the run's uid.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.tag.uid
    }

    /// Returns the creation instant.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Marks the run finished, recording the instant exactly once.
    ///
    /// Subsequent calls return the instant of the first call.
    pub fn finish(&self) -> DateTime<Utc> {
        let mut guard = self.finished_at.write();
        *guard.get_or_insert_with(Utc::now)
    }

    /// Returns the finish instant, if the run has finished.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.read()
    }

    /// Returns the type-erased payload.
    #[must_use]
    pub fn payload(&self) -> &AnyPayload {
        &self.payload
    }

    /// Returns the payload as a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::TypeMismatch`] if the payload is not `T`.
    pub fn payload_as<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, EngineError> {
        self.payload
            .clone()
            .downcast::<T>()
            .map_err(|_| EngineError::TypeMismatch {
                uid: self.tag.uid.clone(),
                stored: "payload".to_string(),
                requested: std::any::type_name::<T>().to_string(),
            })
    }

    /// Returns the index container.
    #[must_use]
    pub fn index(&self) -> &Arc<IndexContainer> {
        &self.index
    }

    /// Returns the result container.
    #[must_use]
    pub fn results(&self) -> &Arc<ResultContainer> {
        &self.results
    }

    /// Returns a global view over the run's results.
    #[must_use]
    pub fn result_view(&self) -> ResultView {
        self.results.descriptors()
    }

    /// Returns the context the run was started with.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        self.tag.uid == other.tag.uid
    }
}

impl Eq for Output {}

impl std::hash::Hash for Output {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.tag.uid.hash(state);
    }
}

impl PartialOrd for Output {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Output {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.tag.uid.cmp(&other.tag.uid)
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("uid", &self.tag.uid)
            .field("pipeline", &self.tag.pipeline)
            .field("finished", &self.finished_at().is_some())
            .finish()
    }
}
