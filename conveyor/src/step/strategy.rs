//! Step strategies and the behaviours they compose.

use super::{StepScope, StepTarget};
use crate::core::StepResult;
use serde::{Deserialize, Serialize};

/// One atomic effect applied after evaluating a result. Strategies are
/// fixed, immutable combinations of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyBehaviours {
    /// Record the result under the target's owner uid.
    pub register_result: bool,
    /// Remove this target from the working pool for subsequent steps.
    pub discard_current: bool,
    /// Empty the entire working pool.
    pub discard_all: bool,
    /// Halt further ordinary steps; pinned steps still run.
    pub stop_current: bool,
    /// Halt every remaining step, pinned or not.
    pub stop_all: bool,
    /// Halt everything including sinks.
    pub exit_pipeline: bool,
}

/// How the execution phase reacts to one evaluated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStrategy {
    /// Record the result and keep going.
    #[default]
    Continue,
    /// Discard the computed result; no record, no pool change.
    Skip,
    /// Record the result and drop this target from the pool.
    DiscardAndContinue,
    /// Record the result, empty the pool, halt ordinary steps.
    Stop,
    /// Record the result, empty the pool, halt all steps.
    Abort,
    /// Record the result and end the run immediately, skipping sinks.
    Exit,
}

impl StepStrategy {
    /// Returns the behaviour set composed into this strategy.
    #[must_use]
    pub const fn behaviours(self) -> StrategyBehaviours {
        match self {
            Self::Continue => StrategyBehaviours {
                register_result: true,
                discard_current: false,
                discard_all: false,
                stop_current: false,
                stop_all: false,
                exit_pipeline: false,
            },
            Self::Skip => StrategyBehaviours {
                register_result: false,
                discard_current: false,
                discard_all: false,
                stop_current: false,
                stop_all: false,
                exit_pipeline: false,
            },
            Self::DiscardAndContinue => StrategyBehaviours {
                register_result: true,
                discard_current: true,
                discard_all: false,
                stop_current: false,
                stop_all: false,
                exit_pipeline: false,
            },
            Self::Stop => StrategyBehaviours {
                register_result: true,
                discard_current: false,
                discard_all: true,
                stop_current: true,
                stop_all: false,
                exit_pipeline: false,
            },
            Self::Abort => StrategyBehaviours {
                register_result: true,
                discard_current: false,
                discard_all: true,
                stop_current: false,
                stop_all: true,
                exit_pipeline: false,
            },
            Self::Exit => StrategyBehaviours {
                register_result: true,
                discard_current: false,
                discard_all: false,
                stop_current: false,
                stop_all: false,
                exit_pipeline: true,
            },
        }
    }
}

impl std::fmt::Display for StepStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Continue => "CONTINUE",
            Self::Skip => "SKIP",
            Self::DiscardAndContinue => "DISCARD_AND_CONTINUE",
            Self::Stop => "STOP",
            Self::Abort => "ABORT",
            Self::Exit => "EXIT",
        };
        f.write_str(name)
    }
}

/// Maps a produced result to the strategy controlling pool and flow
/// mutation.
pub trait ResultEvaluator: Send + Sync {
    /// Evaluates one result against its target and run context.
    fn evaluate(&self, result: &StepResult, target: &StepTarget, scope: &StepScope) -> StepStrategy;
}

/// The default evaluator: every result continues the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContinueEvaluator;

impl ResultEvaluator for ContinueEvaluator {
    fn evaluate(&self, _result: &StepResult, _target: &StepTarget, _scope: &StepScope) -> StepStrategy {
        StepStrategy::Continue
    }
}

/// A closure-based evaluator.
pub struct FnEvaluator<F>
where
    F: Fn(&StepResult, &StepTarget, &StepScope) -> StepStrategy + Send + Sync,
{
    func: F,
}

impl<F> FnEvaluator<F>
where
    F: Fn(&StepResult, &StepTarget, &StepScope) -> StepStrategy + Send + Sync,
{
    /// Creates an evaluator from a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> ResultEvaluator for FnEvaluator<F>
where
    F: Fn(&StepResult, &StepTarget, &StepScope) -> StepStrategy + Send + Sync,
{
    fn evaluate(&self, result: &StepResult, target: &StepTarget, scope: &StepScope) -> StepStrategy {
        (self.func)(result, target, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_behaviour_table() {
        assert!(StepStrategy::Continue.behaviours().register_result);
        assert!(!StepStrategy::Skip.behaviours().register_result);

        let discard = StepStrategy::DiscardAndContinue.behaviours();
        assert!(discard.register_result && discard.discard_current);
        assert!(!discard.discard_all);

        let stop = StepStrategy::Stop.behaviours();
        assert!(stop.register_result && stop.discard_all && stop.stop_current);
        assert!(!stop.stop_all && !stop.exit_pipeline);

        let abort = StepStrategy::Abort.behaviours();
        assert!(abort.register_result && abort.discard_all && abort.stop_all);
        assert!(!abort.stop_current);

        let exit = StepStrategy::Exit.behaviours();
        assert!(exit.register_result && exit.exit_pipeline);
        assert!(!exit.discard_all && !exit.stop_all);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(StepStrategy::DiscardAndContinue.to_string(), "DISCARD_AND_CONTINUE");
        assert_eq!(StepStrategy::Exit.to_string(), "EXIT");
    }
}
