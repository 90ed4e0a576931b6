//! # Queue Drain Core
//!
//! Engine that empties Service Bus subscription queues by receiving (and
//! thereby deleting) messages until each queue is empirically empty.
//!
//! A queue counts as empty once a configured number of consecutive receives
//! returned nothing, with an exponentially growing wait budget offered to each
//! receive. Any message resets that patience.
//!
//! ## Architecture
//!
//! - [`planner`] expands subscriptions and a queue selection into targets
//! - [`coordinator`] runs one [`worker`] per target and aggregates results
//! - [`backoff`] decides when a worker stops
//! - Transport access goes through the `queue-runtime` traits, so the engine
//!   runs unchanged against Azure Service Bus or the in-memory provider
//!
//! ## Usage
//!
//! ```rust
//! use queue_drain_core::{plan_targets, DrainConfig, DrainCoordinator, NoOpTelemetry, QueueSelector};
//! use queue_runtime::{InMemoryNamespace, SubscriptionName, TopicName};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let namespace = InMemoryNamespace::new("contoso");
//! let topic = TopicName::new("orders").unwrap();
//! let subscription = SubscriptionName::new("audit").unwrap();
//! namespace.create_subscription(&topic, &subscription);
//! namespace.send(&topic, &subscription, "stale").unwrap();
//!
//! let targets = plan_targets("contoso", "orders", &["audit"], QueueSelector::MAIN).unwrap();
//! let config = DrainConfig::default()
//!     .with_receive_timeout_base(Duration::from_millis(1))
//!     .with_max_retry_iterations(1);
//! let coordinator = DrainCoordinator::new(
//!     config,
//!     Arc::new(namespace.connector()),
//!     Arc::new(NoOpTelemetry),
//! );
//!
//! let summary = coordinator.run(targets).await.unwrap();
//! assert_eq!(summary.total_messages(), 1);
//! # });
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod planner;
pub mod target;
pub mod telemetry;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use backoff::{
    BackoffController, BackoffDecision, BatchOutcome, RetryState, MAX_RECEIVE_WAIT,
};
pub use clock::SharedClock;
pub use config::DrainConfig;
pub use coordinator::{DrainCoordinator, DrainSummary, StopHandle};
pub use error::{error_chain, AcquisitionStage, ConfigurationError, DrainError, WorkerFailure};
pub use planner::{plan_targets, QueueSelector};
pub use target::DrainTarget;
pub use telemetry::{
    NoOpTelemetry, RecordingTelemetry, ScopedTelemetry, TelemetryEvent, TelemetryScope,
    TelemetrySink, TracingTelemetry,
};
pub use worker::{drain_rate, EndpointWorker, WorkerExit, WorkerReport};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
