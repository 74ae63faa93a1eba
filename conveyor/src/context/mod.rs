//! The run-scoped metadata bag.
//!
//! A context travels with a run and, for nested pipelines, references
//! the invoking run's output as parent. Crossing a composition boundary
//! uses copy semantics (`copy_from`), never shared mutation.

use crate::core::Output;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A key-value metadata bag propagated through a run.
///
/// Individual reads and writes are lock-guarded; callers maintaining
/// multi-key invariants from concurrent sinks must serialize externally.
#[derive(Default)]
pub struct Context {
    data: RwLock<HashMap<String, serde_json::Value>>,
    parent_output: Option<Arc<Output>>,
}

impl Context {
    /// Creates an empty context with no parent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context carrying a copy of another context's entries.
    #[must_use]
    pub fn copy_from(other: &Context) -> Self {
        Self {
            data: RwLock::new(other.data.read().clone()),
            parent_output: other.parent_output.clone(),
        }
    }

    /// Sets the parent output, marking this context as belonging to a
    /// nested run.
    #[must_use]
    pub fn with_parent_output(mut self, parent: Arc<Output>) -> Self {
        self.parent_output = Some(parent);
        self
    }

    /// Returns the parent run's output, if this is a nested run.
    #[must_use]
    pub fn parent_output(&self) -> Option<&Arc<Output>> {
        self.parent_output.as_ref()
    }

    /// Stores a value under a key, replacing any previous value.
    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.data.write().insert(key.into(), value);
    }

    /// Returns a clone of the value under a key, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Removes and returns the value under a key.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// Returns true if a key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Returns the stored keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("len", &self.len())
            .field("nested", &self.parent_output.is_some())
            .finish()
    }
}
