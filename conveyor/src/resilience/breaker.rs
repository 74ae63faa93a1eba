//! Count-based circuit breaker.
//!
//! Tracks call outcomes in a sliding window; once the observed failure
//! rate crosses the threshold at sufficient volume, the breaker opens
//! and fails calls fast until a cooldown elapses, after which a bounded
//! number of half-open probes decide whether to close again.

use crate::errors::EngineError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Failure rate (0.0..=1.0) at which the breaker opens.
    pub failure_rate_threshold: f64,
    /// Minimum recorded calls before the rate is evaluated.
    pub minimum_calls: usize,
    /// Sliding window size in calls.
    pub window_size: usize,
    /// How long the breaker stays open before probing, in milliseconds.
    pub open_cooldown_ms: u64,
    /// Probe budget while half-open.
    pub half_open_max_calls: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            window_size: 100,
            open_cooldown_ms: 30000,
            half_open_max_calls: 3,
        }
    }
}

impl BreakerConfig {
    /// Creates a config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure rate threshold.
    #[must_use]
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = rate.clamp(0.0, 1.0);
        self
    }

    /// Sets the minimum call volume.
    #[must_use]
    pub fn with_minimum_calls(mut self, calls: usize) -> Self {
        self.minimum_calls = calls.max(1);
        self
    }

    /// Sets the sliding window size.
    #[must_use]
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(1);
        self
    }

    /// Sets the open cooldown.
    #[must_use]
    pub fn with_open_cooldown(mut self, cooldown: Duration) -> Self {
        self.open_cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the half-open probe budget.
    #[must_use]
    pub fn with_half_open_max_calls(mut self, calls: usize) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    phase: BreakerPhase,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_inflight: usize,
    half_open_failed: bool,
}

/// A circuit breaker shared by every call to one wrapped component.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Creates a breaker with the given policy.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                phase: BreakerPhase::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_inflight: 0,
                half_open_failed: false,
            }),
        }
    }

    /// Admits or refuses a call.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CircuitOpen`] while the breaker is open
    /// or its half-open probe budget is spent.
    pub fn try_acquire(&self, component: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        match state.phase {
            BreakerPhase::Closed => Ok(()),
            BreakerPhase::Open => {
                let cooldown = Duration::from_millis(self.config.open_cooldown_ms);
                let elapsed = state.opened_at.map_or(Duration::ZERO, |at| at.elapsed());
                if elapsed >= cooldown {
                    tracing::debug!(component, "circuit breaker half-open");
                    state.phase = BreakerPhase::HalfOpen;
                    state.half_open_inflight = 1;
                    state.half_open_failed = false;
                    Ok(())
                } else {
                    Err(EngineError::CircuitOpen {
                        component: component.to_string(),
                    })
                }
            }
            BreakerPhase::HalfOpen => {
                if state.half_open_inflight < self.config.half_open_max_calls {
                    state.half_open_inflight += 1;
                    Ok(())
                } else {
                    Err(EngineError::CircuitOpen {
                        component: component.to_string(),
                    })
                }
            }
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        match state.phase {
            BreakerPhase::HalfOpen => {
                if !state.half_open_failed {
                    state.phase = BreakerPhase::Closed;
                    state.window.clear();
                    state.opened_at = None;
                }
            }
            _ => Self::push_outcome(&self.config, &mut state, true),
        }
    }

    /// Records a failed call, opening the breaker when the window's
    /// failure rate crosses the threshold at sufficient volume.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        match state.phase {
            BreakerPhase::HalfOpen => {
                state.half_open_failed = true;
                state.phase = BreakerPhase::Open;
                state.opened_at = Some(Instant::now());
            }
            _ => {
                Self::push_outcome(&self.config, &mut state, false);
                if Self::should_open(&self.config, &state) {
                    state.phase = BreakerPhase::Open;
                    state.opened_at = Some(Instant::now());
                    tracing::warn!("circuit breaker opened");
                }
            }
        }
    }

    /// Returns true if calls are currently refused.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().phase == BreakerPhase::Open
    }

    fn push_outcome(config: &BreakerConfig, state: &mut BreakerState, success: bool) {
        state.window.push_back(success);
        while state.window.len() > config.window_size {
            state.window.pop_front();
        }
    }

    fn should_open(config: &BreakerConfig, state: &BreakerState) -> bool {
        let total = state.window.len();
        if total < config.minimum_calls {
            return false;
        }
        let failures = state.window.iter().filter(|ok| !**ok).count();
        failures as f64 / total as f64 >= config.failure_rate_threshold
    }
}
