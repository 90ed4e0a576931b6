//! Prometheus telemetry sink for drain runs.

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use queue_drain_core::error_chain;
use queue_drain_core::telemetry::{
    TelemetryScope, TelemetrySink, DRAIN_RATE_METRIC, MESSAGES_DRAINED_METRIC,
};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;

const LABELS: &[&str] = &["entity_path", "namespace"];

/// Drain metrics kept in a private Prometheus registry
///
/// Every flush rewrites `metrics_file` (when set) with the text exposition of
/// all metrics, so the file always reflects the latest state of every target.
pub struct PrometheusTelemetry {
    registry: Registry,
    messages_drained: GaugeVec,
    drain_rate: GaugeVec,
    receive_exceptions: IntCounterVec,
    metrics_file: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl PrometheusTelemetry {
    /// Create the metrics and check that `metrics_file` can be written
    ///
    /// # Errors
    ///
    /// Returns the I/O error when the metrics file cannot be created, or a
    /// Prometheus error if a metric cannot be registered.
    pub fn new(metrics_file: Option<PathBuf>) -> Result<Self, crate::CliError> {
        let registry = Registry::new();

        let messages_drained = GaugeVec::new(
            Opts::new(
                "queue_drain_messages_drained",
                "Messages removed by the latest receive call",
            ),
            LABELS,
        )?;
        let drain_rate = GaugeVec::new(
            Opts::new(
                "queue_drain_rate_messages_per_second",
                "Messages per second of the latest non-empty receive call",
            ),
            LABELS,
        )?;
        let receive_exceptions = IntCounterVec::new(
            Opts::new(
                "queue_drain_receive_exceptions_total",
                "Receive calls that failed with a transport error",
            ),
            LABELS,
        )?;

        registry.register(Box::new(messages_drained.clone()))?;
        registry.register(Box::new(drain_rate.clone()))?;
        registry.register(Box::new(receive_exceptions.clone()))?;

        if let Some(path) = &metrics_file {
            fs::write(path, "")?;
        }

        Ok(Self {
            registry,
            messages_drained,
            drain_rate,
            receive_exceptions,
            metrics_file,
            write_lock: Mutex::new(()),
        })
    }

    /// Text exposition of every metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn write_file(&self) -> Result<(), Box<dyn Error>> {
        let Some(path) = &self.metrics_file else {
            return Ok(());
        };

        let rendered = self.render()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        fs::write(path, rendered)?;
        Ok(())
    }
}

impl TelemetrySink for PrometheusTelemetry {
    fn record_metric(&self, name: &str, value: f64, scope: &TelemetryScope) {
        let labels = [scope.entity_path(), scope.namespace()];
        match name {
            MESSAGES_DRAINED_METRIC => self.messages_drained.with_label_values(&labels).set(value),
            DRAIN_RATE_METRIC => self.drain_rate.with_label_values(&labels).set(value),
            other => debug!(metric = other, "Ignoring unknown metric"),
        }
    }

    fn record_exception(&self, error: &(dyn Error + 'static), scope: &TelemetryScope) {
        debug!(
            entity_path = scope.entity_path(),
            error = %error_chain(error),
            "Counting receive exception"
        );
        self.receive_exceptions
            .with_label_values(&[scope.entity_path(), scope.namespace()])
            .inc();
    }

    fn flush(&self, scope: &TelemetryScope) {
        if let Err(e) = self.write_file() {
            warn!(
                entity_path = scope.entity_path(),
                error = %e,
                "Failed to write metrics file"
            );
        }
    }
}
