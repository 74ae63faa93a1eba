//! Run initialization: turning raw input into a payload, and a payload
//! (or the raw input) into the initial working pool.

use crate::context::Context;
use crate::core::{AnyPayload, IndexEntry};
use crate::errors::EngineError;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds the run payload from the raw input and the context.
#[async_trait]
pub trait Initializer: Send + Sync {
    /// Produces the payload that steps of payload kind will see.
    ///
    /// # Errors
    ///
    /// Returns an error when the input cannot be turned into a payload;
    /// the failure aborts the run before any step executes.
    async fn init(
        &self,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError>;
}

/// Uses the raw input itself as the payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughInitializer;

#[async_trait]
impl Initializer for PassThroughInitializer {
    async fn init(
        &self,
        input: &Arc<serde_json::Value>,
        _ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError> {
        Ok(input.clone())
    }
}

/// Adapts a plain closure into an [`Initializer`].
pub struct FnInitializer<F> {
    func: F,
}

impl<F> FnInitializer<F>
where
    F: Fn(&Arc<serde_json::Value>, &Arc<Context>) -> Result<AnyPayload, EngineError>
        + Send
        + Sync,
{
    /// Wraps the closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Initializer for FnInitializer<F>
where
    F: Fn(&Arc<serde_json::Value>, &Arc<Context>) -> Result<AnyPayload, EngineError>
        + Send
        + Sync,
{
    async fn init(
        &self,
        input: &Arc<serde_json::Value>,
        ctx: &Arc<Context>,
    ) -> Result<AnyPayload, EngineError> {
        (self.func)(input, ctx)
    }
}

/// What an indexer reads the initial pool from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IndexerKind {
    /// Extracts objects from the initialized payload.
    #[default]
    Payload,
    /// Extracts objects from the raw input, before initialization.
    RawInput,
}

/// The slice of run state handed to an indexer, matching its kind.
pub enum IndexSource<'a> {
    /// The initialized payload.
    Payload(&'a AnyPayload),
    /// The raw input.
    RawInput(&'a serde_json::Value),
}

/// Populates the initial working pool.
pub trait Indexer: Send + Sync {
    /// Which source this indexer reads from.
    fn kind(&self) -> IndexerKind {
        IndexerKind::default()
    }

    /// Extracts the objects to seed the pool with, in order.
    ///
    /// # Errors
    ///
    /// Returns an error when the source does not contain extractable
    /// objects; the failure aborts the run before any step executes.
    fn index_from(&self, source: IndexSource<'_>) -> Result<Vec<IndexEntry>, EngineError>;
}

/// Adapts a plain closure into an [`Indexer`].
pub struct FnIndexer<F> {
    kind: IndexerKind,
    func: F,
}

impl<F> FnIndexer<F>
where
    F: Fn(IndexSource<'_>) -> Result<Vec<IndexEntry>, EngineError> + Send + Sync,
{
    /// Wraps the closure as a payload indexer.
    pub fn new(func: F) -> Self {
        Self {
            kind: IndexerKind::Payload,
            func,
        }
    }

    /// Reads from the raw input instead of the payload.
    #[must_use]
    pub fn raw_input(mut self) -> Self {
        self.kind = IndexerKind::RawInput;
        self
    }
}

impl<F> Indexer for FnIndexer<F>
where
    F: Fn(IndexSource<'_>) -> Result<Vec<IndexEntry>, EngineError> + Send + Sync,
{
    fn kind(&self) -> IndexerKind {
        self.kind
    }

    fn index_from(&self, source: IndexSource<'_>) -> Result<Vec<IndexEntry>, EngineError> {
        (self.func)(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Indexable;

    struct Doc {
        uid: String,
    }

    impl Indexable for Doc {
        fn uid(&self) -> &str {
            &self.uid
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[tokio::test]
    async fn test_pass_through_payload_is_raw_input() {
        let input = Arc::new(serde_json::json!({"n": 1}));
        let payload = PassThroughInitializer
            .init(&input, &Arc::new(Context::new()))
            .await
            .unwrap();
        let value = payload.downcast::<serde_json::Value>().unwrap();
        assert_eq!(value.as_ref(), input.as_ref());
    }

    #[test]
    fn test_fn_indexer_reads_raw_input() {
        let indexer = FnIndexer::new(|source| {
            let IndexSource::RawInput(value) = source else {
                return Err(EngineError::business("expected raw input"));
            };
            let uids = value
                .as_array()
                .ok_or_else(|| EngineError::business("expected array"))?;
            Ok(uids
                .iter()
                .filter_map(|v| v.as_str())
                .map(|uid| IndexEntry::new(Arc::new(Doc { uid: uid.into() })))
                .collect())
        })
        .raw_input();

        assert_eq!(indexer.kind(), IndexerKind::RawInput);
        let input = serde_json::json!(["a", "b"]);
        let entries = indexer.index_from(IndexSource::RawInput(&input)).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
