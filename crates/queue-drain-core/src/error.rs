//! Error types for the drain engine.
//!
//! Errors inside the receive loop never leave a worker: they are logged,
//! reported to telemetry and absorbed by the backoff controller. Only
//! configuration problems (before any worker starts) and resource acquisition
//! failures (connect / open receiver) surface to callers.

use crate::target::DrainTarget;
use queue_runtime::{QueueError, ValidationError};
use std::fmt;
use thiserror::Error;

/// Invalid input detected before any worker is spawned
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("At least one subscription is required")]
    NoSubscriptions,

    #[error("At least one queue kind must be selected")]
    EmptySelector,

    #[error("Subscription '{name}' is listed more than once")]
    DuplicateSubscription { name: String },

    #[error("At least one drain target is required")]
    NoTargets,

    #[error("Drain target '{target}' is listed more than once")]
    DuplicateTarget { target: String },

    #[error("Invalid entity name: {0}")]
    InvalidName(#[from] ValidationError),
}

/// Which step of resource acquisition failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStage {
    Connect,
    OpenReceiver,
}

impl fmt::Display for AcquisitionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::OpenReceiver => write!(f, "open receiver"),
        }
    }
}

/// Errors reported by workers and the coordinator
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to {stage} for {target}: {source}")]
    ResourceAcquisition {
        target: String,
        stage: AcquisitionStage,
        #[source]
        source: QueueError,
    },

    #[error("Worker for {target} did not finish: {message}")]
    WorkerAborted { target: String, message: String },

    #[error("{} of {total} drain workers failed", .failures.len())]
    WorkersFailed {
        failures: Vec<WorkerFailure>,
        total: usize,
    },
}

impl DrainError {
    /// Check whether the error originates from the transport
    pub fn is_transport(&self) -> bool {
        match self {
            Self::ResourceAcquisition { .. } => true,
            Self::WorkersFailed { failures, .. } => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_transport())
            }
            Self::Configuration(_) | Self::WorkerAborted { .. } => false,
        }
    }
}

/// A worker that ended without a report
#[derive(Debug)]
pub struct WorkerFailure {
    pub target: DrainTarget,
    pub error: DrainError,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

/// Render an error followed by its `source()` chain, separated by `: `
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
