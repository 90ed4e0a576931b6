//! Telemetry reported by drain workers.
//!
//! This module defines the sink workers report to. Sinks are implemented by
//! outer layers (e.g. the CLI with Prometheus) so the engine does not depend on
//! any particular metrics backend.
//!
//! # Architecture
//!
//! - **Engine** (this crate): decides what to record, per target
//! - **Infrastructure** (queue-drain-cli): exports it
//! - **Best-Effort Pattern**: recording never fails and never blocks draining
//!
//! # Examples
//!
//! ```rust
//! use queue_drain_core::telemetry::{NoOpTelemetry, ScopedTelemetry, TelemetryScope, TelemetrySink};
//! use queue_drain_core::DrainTarget;
//! use queue_runtime::{SubQueue, SubscriptionName, TopicName};
//! use std::sync::Arc;
//!
//! let target = DrainTarget::new(
//!     "contoso",
//!     TopicName::new("orders").unwrap(),
//!     SubscriptionName::new("audit").unwrap(),
//!     SubQueue::Main,
//! );
//!
//! let sink: Arc<dyn TelemetrySink> = Arc::new(NoOpTelemetry);
//! let telemetry = ScopedTelemetry::new(sink, TelemetryScope::for_target(&target));
//!
//! telemetry.record_metric("messages_drained", 12.0);
//! telemetry.flush();
//! ```

use crate::error::error_chain;
use crate::target::DrainTarget;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;

/// Gauge: messages removed by the latest receive (0 for empty or failed)
pub const MESSAGES_DRAINED_METRIC: &str = "messages_drained";

/// Gauge: messages per second for the latest non-empty receive
pub const DRAIN_RATE_METRIC: &str = "drain_rate";

pub const ENTITY_PATH_KEY: &str = "entityPath";
pub const NAMESPACE_KEY: &str = "namespace";
pub const SUB_QUEUE_KEY: &str = "subQueue";

/// Properties attached to everything a worker records
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryScope {
    properties: BTreeMap<String, String>,
}

impl TelemetryScope {
    /// Scope carrying `entityPath`, `namespace` and `subQueue` of a target
    pub fn for_target(target: &DrainTarget) -> Self {
        Self::default()
            .with_property(ENTITY_PATH_KEY, target.entity_path())
            .with_property(NAMESPACE_KEY, target.namespace())
            .with_property(SUB_QUEUE_KEY, target.sub_queue().to_string())
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn entity_path(&self) -> &str {
        self.get(ENTITY_PATH_KEY).unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.get(NAMESPACE_KEY).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Destination for worker metrics and exceptions.
///
/// Implementations should never fail or block for long; recording is best
/// effort.
pub trait TelemetrySink: Send + Sync {
    /// Record a named gauge value
    fn record_metric(&self, name: &str, value: f64, scope: &TelemetryScope);

    /// Record a receive failure
    fn record_exception(&self, error: &(dyn Error + 'static), scope: &TelemetryScope);

    /// Push buffered telemetry for the scope; called once per worker
    fn flush(&self, scope: &TelemetryScope);
}

/// No-op telemetry sink for testing and when no exporter is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpTelemetry;

impl TelemetrySink for NoOpTelemetry {
    fn record_metric(&self, _name: &str, _value: f64, _scope: &TelemetryScope) {
        // No-op
    }

    fn record_exception(&self, _error: &(dyn Error + 'static), _scope: &TelemetryScope) {
        // No-op
    }

    fn flush(&self, _scope: &TelemetryScope) {
        // No-op
    }
}

/// Sink that writes telemetry as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record_metric(&self, name: &str, value: f64, scope: &TelemetryScope) {
        debug!(
            metric = name,
            value,
            entity_path = scope.entity_path(),
            namespace = scope.namespace(),
            "Metric recorded"
        );
    }

    fn record_exception(&self, error: &(dyn Error + 'static), scope: &TelemetryScope) {
        warn!(
            error = %error_chain(error),
            entity_path = scope.entity_path(),
            namespace = scope.namespace(),
            "Exception recorded"
        );
    }

    fn flush(&self, scope: &TelemetryScope) {
        debug!(entity_path = scope.entity_path(), "Telemetry flushed");
    }
}

/// One call received by a [`RecordingTelemetry`]
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Metric {
        name: String,
        value: f64,
        entity_path: String,
    },
    Exception {
        message: String,
        entity_path: String,
    },
    Flush {
        entity_path: String,
    },
}

impl TelemetryEvent {
    pub fn entity_path(&self) -> &str {
        match self {
            Self::Metric { entity_path, .. }
            | Self::Exception { entity_path, .. }
            | Self::Flush { entity_path } => entity_path,
        }
    }
}

/// Sink that keeps every call in memory, in order
///
/// Useful in tests to assert on what workers reported.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.lock().clone()
    }

    /// Events recorded for one entity path
    pub fn events_for(&self, entity_path: &str) -> Vec<TelemetryEvent> {
        self.lock()
            .iter()
            .filter(|e| e.entity_path() == entity_path)
            .cloned()
            .collect()
    }

    /// Values recorded for a metric on one entity path
    pub fn metric_values(&self, entity_path: &str, name: &str) -> Vec<f64> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                TelemetryEvent::Metric {
                    name: n,
                    value,
                    entity_path: p,
                } if n == name && p == entity_path => Some(*value),
                _ => None,
            })
            .collect()
    }

    pub fn flush_count(&self, entity_path: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::Flush { entity_path: p } if p == entity_path))
            .count()
    }

    pub fn exception_count(&self, entity_path: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| {
                matches!(e, TelemetryEvent::Exception { entity_path: p, .. } if p == entity_path)
            })
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TelemetryEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, event: TelemetryEvent) {
        self.lock().push(event);
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_metric(&self, name: &str, value: f64, scope: &TelemetryScope) {
        self.push(TelemetryEvent::Metric {
            name: name.to_string(),
            value,
            entity_path: scope.entity_path().to_string(),
        });
    }

    fn record_exception(&self, error: &(dyn Error + 'static), scope: &TelemetryScope) {
        self.push(TelemetryEvent::Exception {
            message: error_chain(error),
            entity_path: scope.entity_path().to_string(),
        });
    }

    fn flush(&self, scope: &TelemetryScope) {
        self.push(TelemetryEvent::Flush {
            entity_path: scope.entity_path().to_string(),
        });
    }
}

/// A sink bound to one target's scope
#[derive(Clone)]
pub struct ScopedTelemetry {
    sink: Arc<dyn TelemetrySink>,
    scope: TelemetryScope,
}

impl ScopedTelemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>, scope: TelemetryScope) -> Self {
        Self { sink, scope }
    }

    pub fn scope(&self) -> &TelemetryScope {
        &self.scope
    }

    pub fn record_metric(&self, name: &str, value: f64) {
        self.sink.record_metric(name, value, &self.scope);
    }

    pub fn record_exception(&self, error: &(dyn Error + 'static)) {
        self.sink.record_exception(error, &self.scope);
    }

    pub fn flush(&self) {
        self.sink.flush(&self.scope);
    }
}
