//! Step results and the descriptors that record them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single value produced by a step or sink.
///
/// Results carry a stable `kind` discriminant so containers and views
/// can filter by result kind without knowing concrete types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    kind: String,
    value: serde_json::Value,
}

impl StepResult {
    /// Creates a result of the given kind with a value.
    #[must_use]
    pub fn new(kind: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            value,
        }
    }

    /// Creates a result of the given kind with no value.
    #[must_use]
    pub fn empty(kind: impl Into<String>) -> Self {
        Self::new(kind, serde_json::Value::Null)
    }

    /// Returns the result kind discriminant.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the result value.
    #[must_use]
    pub fn value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Returns true if this result is of the given kind.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// What a single step execution yields: exactly one result, or an
/// ordered batch evaluated member-by-member.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// A single result.
    One(StepResult),
    /// An ordered batch of results.
    Many(Vec<StepResult>),
}

impl StepOutcome {
    /// Creates a single-result outcome.
    #[must_use]
    pub fn one(result: StepResult) -> Self {
        Self::One(result)
    }

    /// Creates a batch outcome.
    #[must_use]
    pub fn many(results: Vec<StepResult>) -> Self {
        Self::Many(results)
    }

    /// Consumes the outcome into an ordered list of results.
    #[must_use]
    pub fn into_vec(self) -> Vec<StepResult> {
        match self {
            Self::One(result) => vec![result],
            Self::Many(results) => results,
        }
    }
}

impl From<StepResult> for StepOutcome {
    fn from(result: StepResult) -> Self {
        Self::One(result)
    }
}

/// An immutable record of one result, bound to the object it was
/// produced for and stamped with its creation instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDescriptor {
    owner_uid: String,
    component: String,
    created_at: DateTime<Utc>,
    result: StepResult,
}

impl ResultDescriptor {
    /// Creates a descriptor stamped with the current instant.
    #[must_use]
    pub fn new(
        owner_uid: impl Into<String>,
        component: impl Into<String>,
        result: StepResult,
    ) -> Self {
        Self::recorded_at(owner_uid, component, result, Utc::now())
    }

    /// Creates a descriptor with an explicit creation instant.
    ///
    /// Merging containers preserves original instants, so descriptors
    /// inherited from a parent run keep their old-generation stamps.
    #[must_use]
    pub fn recorded_at(
        owner_uid: impl Into<String>,
        component: impl Into<String>,
        result: StepResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_uid: owner_uid.into(),
            component: component.into(),
            created_at,
            result,
        }
    }

    /// Returns the uid of the object this result belongs to.
    #[must_use]
    pub fn owner_uid(&self) -> &str {
        &self.owner_uid
    }

    /// Returns the tag of the component that produced the result.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Returns the creation instant.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the recorded result.
    #[must_use]
    pub fn result(&self) -> &StepResult {
        &self.result
    }
}
