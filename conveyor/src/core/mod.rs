//! Core data model: indexed objects, result logs, and run outputs.

mod container;
mod index;
mod indexable;
mod output;
mod result;

pub use container::{ResultContainer, ResultView};
pub use index::{IndexContainer, IndexEntry};
pub use indexable::Indexable;
pub use output::{AnyPayload, Output, OutputTag};
pub use result::{ResultDescriptor, StepOutcome, StepResult};
