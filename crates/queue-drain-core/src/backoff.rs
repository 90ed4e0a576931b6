//! # Backoff Controller
//!
//! Decides, after every receive, whether a worker keeps going and how long the
//! next receive may wait for messages.
//!
//! The wait grows exponentially (`base * 2^iteration`) while receives come back
//! empty or fail, and patience resets as soon as a batch yields messages. A
//! target counts as drained once `max_retry_iterations` consecutive receives
//! produced nothing.
//!
//! The wait is a budget handed to the receive call, not a sleep between calls.

use crate::config::DrainConfig;
use std::time::Duration;

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;

/// Longest wait budget handed to a single receive
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Classification of one receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The receive returned this many messages (always > 0)
    NonEmpty(usize),
    /// The receive returned no messages within its wait budget
    Empty,
    /// The receive failed with a non-cancellation error
    TransientError,
}

impl BatchOutcome {
    /// Classify a batch by its size
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            Self::Empty
        } else {
            Self::NonEmpty(count)
        }
    }

    /// Messages removed by the receive
    pub fn message_count(&self) -> usize {
        match self {
            Self::NonEmpty(count) => *count,
            Self::Empty | Self::TransientError => 0,
        }
    }
}

/// Per-worker retry position; iterations start at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    iteration: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self { iteration: 1 }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }
}

/// Result of feeding an outcome to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDecision {
    /// State for the next iteration
    pub state: RetryState,
    /// Wait budget for the next receive
    pub wait: Duration,
    /// `false` once the retry budget is exhausted
    pub proceed: bool,
}

/// Pure backoff state machine
///
/// # Examples
///
/// ```rust
/// use queue_drain_core::backoff::{BackoffController, BatchOutcome, RetryState};
/// use std::time::Duration;
///
/// let controller = BackoffController::new(Duration::from_secs(10), 5);
/// let state = RetryState::new();
///
/// assert_eq!(controller.wait_duration(state.iteration()), Duration::from_secs(20));
///
/// let decision = controller.next(state, BatchOutcome::Empty);
/// assert_eq!(decision.state.iteration(), 2);
/// assert_eq!(decision.wait, Duration::from_secs(40));
/// assert!(decision.proceed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffController {
    base: Duration,
    max_retry_iterations: u32,
}

impl BackoffController {
    pub fn new(base: Duration, max_retry_iterations: u32) -> Self {
        Self {
            base,
            max_retry_iterations,
        }
    }

    pub fn from_config(config: &DrainConfig) -> Self {
        Self::new(config.receive_timeout_base, config.max_retry_iterations)
    }

    /// Wait budget for a receive made at `iteration`
    ///
    /// Capped at [`MAX_RECEIVE_WAIT`] so providers can always add it to an
    /// instant.
    pub fn wait_duration(&self, iteration: u32) -> Duration {
        2u32.checked_pow(iteration)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(MAX_RECEIVE_WAIT, |wait| wait.min(MAX_RECEIVE_WAIT))
    }

    /// Whether a worker at `state` may issue another receive
    pub fn should_proceed(&self, state: RetryState) -> bool {
        state.iteration <= self.max_retry_iterations
    }

    /// Advance the state machine by one receive outcome
    pub fn next(&self, state: RetryState, outcome: BatchOutcome) -> BackoffDecision {
        let iteration = match outcome {
            BatchOutcome::NonEmpty(_) => 1,
            BatchOutcome::Empty | BatchOutcome::TransientError => {
                state.iteration.saturating_add(1)
            }
        };
        let state = RetryState { iteration };

        BackoffDecision {
            state,
            wait: self.wait_duration(iteration),
            proceed: self.should_proceed(state),
        }
    }
}
