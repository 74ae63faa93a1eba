//! Retry policy with configurable backoff and jitter strategies.

use crate::errors::EngineError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: usize,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Calculates the delay before the retry following `attempt`
    /// (0-indexed failed attempt).
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => base
                .saturating_mul(2u64.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX)))
                .min(max),
            BackoffStrategy::Linear => base.saturating_mul(attempt as u64 + 1).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Hooks observing retry activity on a wrapped component.
pub trait RetryListener: Send + Sync {
    /// Called before each re-invocation, with the number of the failed
    /// attempt and the error that caused it.
    fn on_retry(&self, _attempt: usize, _error: &EngineError) {}

    /// Called when the wrapped call succeeds, with the total attempts
    /// spent.
    fn on_success(&self, _attempts: usize) {}
}

/// A listener that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRetryListener;

impl RetryListener for NoOpRetryListener {}

/// A retry configuration paired with its listener.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    listener: Arc<dyn RetryListener>,
}

impl RetryPolicy {
    /// Creates a policy with no listener.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            listener: Arc::new(NoOpRetryListener),
        }
    }

    /// Attaches a listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Returns the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub(crate) fn notify_retry(&self, attempt: usize, error: &EngineError) {
        self.listener.on_retry(attempt, error);
    }

    pub(crate) fn notify_success(&self, attempts: usize) {
        self.listener.on_success(attempts);
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish()
    }
}
