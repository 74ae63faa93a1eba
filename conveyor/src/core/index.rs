//! The per-run index of domain objects.

use super::Indexable;
use crate::errors::EngineError;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// One indexed object plus the type information recorded when it was
/// handed to the container.
#[derive(Clone)]
pub struct IndexEntry {
    object: Arc<dyn Indexable>,
    any: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl IndexEntry {
    /// Wraps a concrete object, capturing its declared type.
    #[must_use]
    pub fn new<T: Indexable>(object: Arc<T>) -> Self {
        Self {
            any: object.clone(),
            type_name: std::any::type_name::<T>(),
            object,
        }
    }

    /// Returns the stored object.
    #[must_use]
    pub fn object(&self) -> &Arc<dyn Indexable> {
        &self.object
    }

    /// Returns the declared type name recorded at indexing time.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for IndexEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexEntry")
            .field("uid", &self.object.uid())
            .field("type_name", &self.type_name)
            .finish()
    }
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<String, IndexEntry>,
    order: Vec<String>,
}

/// An ordered map from uid to object, built once per run right after
/// initialization and read-only thereafter.
///
/// Iteration order is insertion order, not uid order. Re-indexing an
/// existing uid overwrites its position; the container never holds two
/// entries under one uid. There is no removal operation: discarding is
/// a property of the execution phase's working pool, not of the index.
#[derive(Default)]
pub struct IndexContainer {
    state: RwLock<IndexState>,
}

impl IndexContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a concrete object under its uid.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if the object's uid is
    /// empty.
    pub fn index<T: Indexable>(&self, object: Arc<T>) -> Result<(), EngineError> {
        self.index_entry(IndexEntry::new(object))
    }

    /// Indexes a pre-built entry under its object's uid.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if the object's uid is
    /// empty.
    pub fn index_entry(&self, entry: IndexEntry) -> Result<(), EngineError> {
        let uid = entry.object.uid().to_string();
        if uid.is_empty() {
            return Err(EngineError::InvalidArgument(
                "cannot index an object with an empty uid".to_string(),
            ));
        }

        let mut state = self.state.write();
        if state.entries.insert(uid.clone(), entry).is_some() {
            state.order.retain(|u| u != &uid);
        }
        state.order.push(uid);
        Ok(())
    }

    /// Returns the object stored under `uid`, if any.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<Arc<dyn Indexable>> {
        self.state.read().entries.get(uid).map(|e| e.object.clone())
    }

    /// Returns the object stored under `uid` as a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if the uid is unknown,
    /// or [`EngineError::TypeMismatch`] if the stored declared type is
    /// not `T`.
    pub fn get_as<T: Indexable>(&self, uid: &str) -> Result<Arc<T>, EngineError> {
        let state = self.state.read();
        let entry = state
            .entries
            .get(uid)
            .ok_or_else(|| EngineError::InvalidArgument(format!("no object indexed under '{uid}'")))?;

        entry
            .any
            .clone()
            .downcast::<T>()
            .map_err(|_| EngineError::TypeMismatch {
                uid: uid.to_string(),
                stored: entry.type_name.to_string(),
                requested: std::any::type_name::<T>().to_string(),
            })
    }

    /// Returns the declared type name recorded for `uid`, if indexed.
    #[must_use]
    pub fn type_name_of(&self, uid: &str) -> Option<&'static str> {
        self.state.read().entries.get(uid).map(|e| e.type_name)
    }

    /// Returns true if an object is indexed under `uid`.
    #[must_use]
    pub fn contains(&self, uid: &str) -> bool {
        self.state.read().entries.contains_key(uid)
    }

    /// Returns every indexed object in insertion order.
    #[must_use]
    pub fn stream(&self) -> Vec<Arc<dyn Indexable>> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|uid| state.entries.get(uid).map(|e| e.object.clone()))
            .collect()
    }

    /// Returns every indexed uid in insertion order.
    #[must_use]
    pub fn uids(&self) -> Vec<String> {
        self.state.read().order.clone()
    }

    /// Returns the number of indexed objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing has been indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }
}

impl std::fmt::Debug for IndexContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexContainer")
            .field("len", &self.len())
            .finish()
    }
}
