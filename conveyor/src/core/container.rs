//! Append-only, per-owner log of step outcomes with generation-aware
//! queries.
//!
//! A container distinguishes its *current generation* (descriptors
//! created at or after the container itself) from descriptors merged in
//! from an older container, which is how a child run answers "what did
//! I just produce" without re-deriving it from inherited history.

use super::{ResultDescriptor, StepResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct ContainerState {
    entries: HashMap<String, Vec<Arc<ResultDescriptor>>>,
    owners: Vec<String>,
}

impl ContainerState {
    fn push(&mut self, descriptor: Arc<ResultDescriptor>) {
        let owner = descriptor.owner_uid().to_string();
        match self.entries.get_mut(&owner) {
            Some(list) => list.push(descriptor),
            None => {
                self.entries.insert(owner.clone(), vec![descriptor]);
                self.owners.push(owner);
            }
        }
    }

    fn all(&self) -> impl Iterator<Item = &Arc<ResultDescriptor>> {
        self.owners
            .iter()
            .filter_map(|owner| self.entries.get(owner))
            .flatten()
    }
}

/// The per-run log of result descriptors, keyed by owner uid.
pub struct ResultContainer {
    created_at: DateTime<Utc>,
    state: RwLock<ContainerState>,
}

impl Default for ResultContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultContainer {
    /// Creates an empty container stamped at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            state: RwLock::new(ContainerState::default()),
        }
    }

    /// Returns the container's creation instant, the boundary between
    /// the current generation and inherited descriptors.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Appends a descriptor under its owner uid.
    pub fn register(&self, descriptor: ResultDescriptor) {
        self.state.write().push(Arc::new(descriptor));
    }

    /// Merges every descriptor of `other`, per owner, preserving order
    /// and original creation instants.
    ///
    /// This is how a child output inherits a parent output's results at
    /// creation time: the merged descriptors keep their old stamps and
    /// therefore stay outside this container's current generation.
    pub fn register_container(&self, other: &ResultContainer) {
        let descriptors: Vec<_> = {
            let other_state = other.state.read();
            other_state.all().cloned().collect()
        };
        let mut state = self.state.write();
        for descriptor in descriptors {
            state.push(descriptor);
        }
    }

    /// Appends the descriptors visible through a view's self scope,
    /// preserving their original instants.
    ///
    /// An owner-scoped view contributes only its owner's descriptors,
    /// registered under that same uid. A global view contributes every
    /// descriptor it exposes, each under its own owner uid, which makes
    /// it equivalent to [`register_container`](Self::register_container)
    /// over the view's source.
    pub fn register_view(&self, view: &ResultView) {
        let mut state = self.state.write();
        for descriptor in view.stream() {
            state.push(descriptor);
        }
    }

    /// Returns a read-only view over the whole container.
    #[must_use]
    pub fn descriptors(self: &Arc<Self>) -> ResultView {
        ResultView {
            container: self.clone(),
            scope: None,
        }
    }

    /// Returns a read-only view scoped to one owner uid.
    #[must_use]
    pub fn of(self: &Arc<Self>, uid: impl Into<String>) -> ResultView {
        ResultView {
            container: self.clone(),
            scope: Some(uid.into()),
        }
    }

    /// Returns the number of distinct owners tracked.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.read().owners.len()
    }

    fn collect(&self, scope: Option<&str>, current_only: bool, kind: Option<&str>) -> Vec<Arc<ResultDescriptor>> {
        let state = self.state.read();
        let filter = |d: &&Arc<ResultDescriptor>| {
            (!current_only || d.created_at() >= self.created_at)
                && kind.map_or(true, |k| d.result().is(k))
        };
        match scope {
            Some(owner) => state
                .entries
                .get(owner)
                .map(|list| list.iter().filter(filter).cloned().collect())
                .unwrap_or_default(),
            None => state.all().filter(filter).cloned().collect(),
        }
    }

    fn latest(&self, scope: Option<&str>, kind: &str) -> Option<Arc<ResultDescriptor>> {
        self.collect(scope, false, Some(kind))
            .into_iter()
            .fold(None, |best: Option<Arc<ResultDescriptor>>, d| match best {
                Some(b) if b.created_at() > d.created_at() => Some(b),
                _ => Some(d),
            })
    }
}

impl std::fmt::Debug for ResultContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultContainer")
            .field("created_at", &self.created_at)
            .field("owners", &self.size())
            .finish()
    }
}

/// A read-only projection of a [`ResultContainer`], either global or
/// scoped to a single owner uid.
#[derive(Clone)]
pub struct ResultView {
    container: Arc<ResultContainer>,
    scope: Option<String>,
}

impl ResultView {
    /// Returns the owner uid this view is scoped to, if any.
    #[must_use]
    pub fn owner_uid(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Returns every visible descriptor, all generations.
    #[must_use]
    pub fn stream(&self) -> Vec<Arc<ResultDescriptor>> {
        self.container.collect(self.scope.as_deref(), false, None)
    }

    /// Returns every visible descriptor of the given kind, all
    /// generations.
    #[must_use]
    pub fn stream_of(&self, kind: &str) -> Vec<Arc<ResultDescriptor>> {
        self.container
            .collect(self.scope.as_deref(), false, Some(kind))
    }

    /// Returns the most recent descriptor of the given kind across all
    /// generations.
    #[must_use]
    pub fn latest(&self, kind: &str) -> Option<Arc<ResultDescriptor>> {
        self.container.latest(self.scope.as_deref(), kind)
    }

    /// Returns the most recent result value of the given kind, if any.
    #[must_use]
    pub fn latest_value(&self, kind: &str) -> Option<StepResult> {
        self.latest(kind).map(|d| d.result().clone())
    }

    /// Returns the visible current-generation descriptors.
    #[must_use]
    pub fn current(&self) -> Vec<Arc<ResultDescriptor>> {
        self.container.collect(self.scope.as_deref(), true, None)
    }

    /// Returns the visible current-generation descriptors of the given
    /// kind.
    #[must_use]
    pub fn current_of(&self, kind: &str) -> Vec<Arc<ResultDescriptor>> {
        self.container
            .collect(self.scope.as_deref(), true, Some(kind))
    }

    /// Returns the number of distinct owners visible through the view.
    #[must_use]
    pub fn size(&self) -> usize {
        match &self.scope {
            Some(owner) => usize::from(self.container.state.read().entries.contains_key(owner)),
            None => self.container.size(),
        }
    }
}

impl std::fmt::Debug for ResultView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultView")
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn descriptor(owner: &str, kind: &str) -> ResultDescriptor {
        ResultDescriptor::new(owner, "test-step", StepResult::empty(kind))
    }

    fn backdated(owner: &str, kind: &str, seconds_ago: i64) -> ResultDescriptor {
        ResultDescriptor::recorded_at(
            owner,
            "test-step",
            StepResult::empty(kind),
            Utc::now() - Duration::seconds(seconds_ago),
        )
    }

    #[test]
    fn test_per_owner_insertion_order() {
        let container = Arc::new(ResultContainer::new());
        container.register(descriptor("o-1", "a"));
        container.register(descriptor("o-1", "b"));
        container.register(descriptor("o-2", "c"));

        let kinds: Vec<_> = container
            .of("o-1")
            .stream()
            .iter()
            .map(|d| d.result().kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["a", "b"]);
        assert_eq!(container.size(), 2);
    }

    #[test]
    fn test_generation_invariant() {
        let a = Arc::new(ResultContainer::new());
        a.register(backdated("o-1", "old", 60));
        a.register(backdated("o-2", "old", 30));

        let b = Arc::new(ResultContainer::new());
        b.register_container(&a);
        let k = 3;
        for i in 0..k {
            b.register(descriptor("o-1", &format!("new-{i}")));
        }

        assert_eq!(b.descriptors().current().len(), k);
        assert_eq!(
            b.descriptors().stream().len(),
            a.descriptors().stream().len() + k
        );
    }

    #[test]
    fn test_merge_preserves_timestamps() {
        let a = Arc::new(ResultContainer::new());
        let old = backdated("o-1", "old", 120);
        let stamp = old.created_at();
        a.register(old);

        let b = Arc::new(ResultContainer::new());
        b.register_container(&a);

        let merged = b.descriptors().stream();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].created_at(), stamp);
        assert!(b.descriptors().current().is_empty());
    }

    #[test]
    fn test_latest_scans_all_generations() {
        let container = Arc::new(ResultContainer::new());
        container.register(backdated("o-1", "score", 60));
        container.register(descriptor("o-1", "score"));

        let view = container.of("o-1");
        let latest = view.latest("score").unwrap();
        assert!(latest.created_at() >= container.created_at());
        assert_eq!(view.stream_of("score").len(), 2);
        assert_eq!(view.current_of("score").len(), 1);
    }

    #[test]
    fn test_register_view_scopes_to_owner() {
        let source = Arc::new(ResultContainer::new());
        source.register(descriptor("o-1", "keep"));
        source.register(descriptor("o-2", "drop"));

        let target = Arc::new(ResultContainer::new());
        target.register_view(&source.of("o-1"));

        assert_eq!(target.size(), 1);
        let kinds: Vec<_> = target
            .descriptors()
            .stream()
            .iter()
            .map(|d| d.result().kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["keep"]);
    }

    #[test]
    fn test_register_global_view_copies_every_owner() {
        let source = Arc::new(ResultContainer::new());
        source.register(backdated("o-1", "old", 60));
        source.register(descriptor("o-2", "new"));

        let target = Arc::new(ResultContainer::new());
        target.register_view(&source.descriptors());

        assert_eq!(target.size(), 2);
        assert_eq!(target.descriptors().stream().len(), 2);
        assert_eq!(
            target.of("o-1").stream().len() + target.of("o-2").stream().len(),
            2
        );
        // Original instants survive, so the backdated descriptor stays
        // outside the target's current generation.
        assert_eq!(target.descriptors().current().len(), 1);
    }

    #[test]
    fn test_scoped_view_hides_other_owners() {
        let container = Arc::new(ResultContainer::new());
        container.register(descriptor("o-1", "a"));
        container.register(descriptor("o-2", "b"));

        let view = container.of("o-2");
        assert_eq!(view.stream().len(), 1);
        assert!(view.latest("a").is_none());
        assert_eq!(view.size(), 1);
    }
}
