//! # Drain Coordinator
//!
//! Runs one [`EndpointWorker`] per target concurrently and aggregates their
//! results.
//!
//! Workers are independent: one worker failing never stops its siblings, and
//! failures are only surfaced after every worker has finished. A stop request
//! cancels the shared token; the coordinator then waits up to the shutdown
//! grace period for workers to release their resources before aborting the
//! ones still running.

use crate::clock::SharedClock;
use crate::config::DrainConfig;
use crate::error::{ConfigurationError, DrainError, WorkerFailure};
use crate::target::DrainTarget;
use crate::telemetry::{ScopedTelemetry, TelemetryScope, TelemetrySink};
use crate::worker::{EndpointWorker, WorkerExit, WorkerReport};
use queue_runtime::QueueConnector;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;

/// Default time workers get to wind down after a stop request
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Cloneable handle that stops a running drain
///
/// Stopping is idempotent and cannot be undone.
#[derive(Debug, Clone)]
pub struct StopHandle {
    cancel: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stop requested");
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Aggregated outcome of a drain run
#[derive(Debug)]
pub struct DrainSummary {
    /// Reports of workers that finished, in completion order
    pub reports: Vec<WorkerReport>,
    /// Workers that ended without a report
    pub failures: Vec<WorkerFailure>,
    /// Whether a stop was requested during the run
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl DrainSummary {
    pub fn total_targets(&self) -> usize {
        self.reports.len() + self.failures.len()
    }

    pub fn total_messages(&self) -> u64 {
        self.reports.iter().map(|r| r.messages_drained).sum()
    }

    /// Number of targets confirmed empty
    pub fn drained_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.exit == WorkerExit::Drained)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn recorded failures into an error
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::WorkersFailed`] carrying every failure when at
    /// least one worker failed.
    pub fn into_result(self) -> Result<DrainSummary, DrainError> {
        if self.failures.is_empty() {
            return Ok(self);
        }

        let total = self.total_targets();
        Err(DrainError::WorkersFailed {
            failures: self.failures,
            total,
        })
    }
}

/// Fans a drain out over many targets
pub struct DrainCoordinator {
    config: Arc<DrainConfig>,
    connector: Arc<dyn QueueConnector>,
    telemetry: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl DrainCoordinator {
    pub fn new(
        config: DrainConfig,
        connector: Arc<dyn QueueConnector>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            telemetry,
            cancel: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set how long workers may keep running after a stop request
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Request a stop; same as `stop_handle().stop()`
    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Drain every target and wait for all workers to finish
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Configuration`] before spawning anything if the
    /// configuration is invalid, no target is given, or a target is listed
    /// twice. Worker failures do not make this fail; they are collected in
    /// [`DrainSummary::failures`] (see [`DrainSummary::into_result`]).
    pub async fn run(&self, targets: Vec<DrainTarget>) -> Result<DrainSummary, DrainError> {
        self.config.validate()?;
        validate_targets(&targets)?;

        let clock = SharedClock::start();
        let total = targets.len();
        info!(
            targets = total,
            namespace = self.connector.namespace(),
            provider = %self.connector.provider_type(),
            "Starting drain run"
        );

        let mut spawned: HashMap<Id, DrainTarget> = HashMap::with_capacity(total);
        let mut workers = JoinSet::new();
        for target in targets {
            let worker = EndpointWorker::new(
                target.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.connector),
                self.cancel.clone(),
                clock,
                ScopedTelemetry::new(
                    Arc::clone(&self.telemetry),
                    TelemetryScope::for_target(&target),
                ),
            );
            let handle = workers.spawn(worker.run());
            spawned.insert(handle.id(), target);
        }

        let mut reports = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let joined = match deadline {
                None => {
                    tokio::select! {
                        joined = workers.join_next_with_id() => joined,
                        _ = self.cancel.cancelled() => {
                            info!(
                                remaining = workers.len(),
                                grace_secs = self.shutdown_grace.as_secs(),
                                "Waiting for workers to stop"
                            );
                            deadline = Some(Instant::now() + self.shutdown_grace);
                            continue;
                        }
                    }
                }
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, workers.join_next_with_id()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(
                                remaining = workers.len(),
                                "Shutdown grace period elapsed, aborting remaining workers"
                            );
                            workers.abort_all();
                            while let Some(joined) = workers.join_next_with_id().await {
                                collect(joined, &mut spawned, &mut reports, &mut failures);
                            }
                            break;
                        }
                    }
                }
            };

            match joined {
                Some(joined) => collect(joined, &mut spawned, &mut reports, &mut failures),
                None => break,
            }
        }

        let summary = DrainSummary {
            reports,
            failures,
            cancelled: self.cancel.is_cancelled(),
            elapsed: clock.elapsed(),
        };

        info!(
            targets = total,
            drained = summary.drained_count(),
            failed = summary.failures.len(),
            cancelled = summary.cancelled,
            messages = summary.total_messages(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Completed"
        );

        Ok(summary)
    }
}

type Joined = Result<(Id, Result<WorkerReport, DrainError>), JoinError>;

fn collect(
    joined: Joined,
    spawned: &mut HashMap<Id, DrainTarget>,
    reports: &mut Vec<WorkerReport>,
    failures: &mut Vec<WorkerFailure>,
) {
    match joined {
        Ok((id, Ok(report))) => {
            spawned.remove(&id);
            reports.push(report);
        }
        Ok((id, Err(error))) => {
            if let Some(target) = spawned.remove(&id) {
                failures.push(WorkerFailure { target, error });
            }
        }
        Err(join_error) => {
            let Some(target) = spawned.remove(&join_error.id()) else {
                return;
            };
            let reason = if join_error.is_panic() {
                "worker panicked"
            } else {
                "aborted after the shutdown grace period"
            };
            error!(drain_target = %target, reason, "Worker ended without a report");
            failures.push(WorkerFailure {
                error: DrainError::WorkerAborted {
                    target: target.to_string(),
                    message: reason.to_string(),
                },
                target,
            });
        }
    }
}

fn validate_targets(targets: &[DrainTarget]) -> Result<(), ConfigurationError> {
    if targets.is_empty() {
        return Err(ConfigurationError::NoTargets);
    }

    let mut seen = HashSet::with_capacity(targets.len());
    for target in targets {
        if !seen.insert(target) {
            return Err(ConfigurationError::DuplicateTarget {
                target: target.to_string(),
            });
        }
    }
    Ok(())
}
