//! Drain configuration shared by every worker of a run.

use crate::error::ConfigurationError;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Default base for the receive wait budget
pub const DEFAULT_RECEIVE_TIMEOUT_BASE: Duration = Duration::from_secs(10);

/// Default maximum number of messages per receive call
pub const DEFAULT_BATCH_SIZE: u32 = 1000;

/// Default number of consecutive empty (or failed) receives before a target
/// counts as drained
pub const DEFAULT_MAX_RETRY_ITERATIONS: u32 = 5;

/// Tuning for a drain run
///
/// # Examples
///
/// ```rust
/// use queue_drain_core::DrainConfig;
/// use std::time::Duration;
///
/// let config = DrainConfig::default()
///     .with_batch_size(250)
///     .with_prefetch_count(Some(500));
///
/// assert_eq!(config.receive_timeout_base, Duration::from_secs(10));
/// assert_eq!(config.batch_size, 250);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainConfig {
    /// Base of the exponential wait budget offered to each receive call
    pub receive_timeout_base: Duration,

    /// Maximum number of messages requested per receive call
    pub batch_size: u32,

    /// Consecutive non-productive iterations tolerated before stopping
    pub max_retry_iterations: u32,

    /// Messages the transport may buffer ahead of receive calls
    pub prefetch_count: Option<u32>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            receive_timeout_base: DEFAULT_RECEIVE_TIMEOUT_BASE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retry_iterations: DEFAULT_MAX_RETRY_ITERATIONS,
            prefetch_count: None,
        }
    }
}

impl DrainConfig {
    /// Build a configuration from loosely validated numeric options
    ///
    /// Absent or non-positive values fall back to the defaults; a
    /// non-positive prefetch count disables prefetch.
    pub fn from_options(
        timeout_seconds: Option<i64>,
        batch_size: Option<i64>,
        retry_iterations: Option<i64>,
        prefetch_count: Option<i64>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            receive_timeout_base: positive(timeout_seconds)
                .map(Duration::from_secs)
                .unwrap_or(defaults.receive_timeout_base),
            batch_size: positive(batch_size)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.batch_size),
            max_retry_iterations: positive(retry_iterations)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_retry_iterations),
            prefetch_count: positive(prefetch_count).and_then(|v| u32::try_from(v).ok()),
        }
    }

    pub fn with_receive_timeout_base(mut self, base: Duration) -> Self {
        self.receive_timeout_base = base;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_retry_iterations(mut self, iterations: u32) -> Self {
        self.max_retry_iterations = iterations;
        self
    }

    pub fn with_prefetch_count(mut self, prefetch_count: Option<u32>) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }

    /// Check the invariants every worker relies on
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.receive_timeout_base.is_zero() {
            return Err(ConfigurationError::InvalidValue {
                field: "receive_timeout_base".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "batch_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.max_retry_iterations == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "max_retry_iterations".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn positive(value: Option<i64>) -> Option<u64> {
    value.filter(|v| *v > 0).map(|v| v as u64)
}
