//! Monotonic clock shared by all workers of a run.

use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

/// Start point of a run, captured once and read by every worker
///
/// Built on `tokio::time::Instant` so paused-time tests control it.
#[derive(Debug, Clone, Copy)]
pub struct SharedClock {
    started_at: Instant,
}

impl SharedClock {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
