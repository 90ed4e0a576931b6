//! # Endpoint Worker
//!
//! Drains one [`DrainTarget`] until it is empirically empty or the run is
//! stopped.
//!
//! A worker moves through three states:
//!
//! 1. **Draining** - receive a batch (receive-and-delete) within the current
//!    wait budget, classify it, report it, and ask the backoff controller
//!    whether to continue
//! 2. **Closing** - close the receiver, dispose the client, flush telemetry;
//!    release failures are logged and never fatal. A panic in the drain loop
//!    still goes through this state, and an aborted task releases whatever it
//!    holds on a background task
//! 3. **Done**
//!
//! Receive failures other than cancellation never leave the loop: they count
//! as a non-productive iteration. Cancellation ends the loop immediately
//! without touching the retry budget, and no receive is started once the stop
//! signal has been observed.

use crate::backoff::{BackoffController, BatchOutcome, RetryState};
use crate::clock::SharedClock;
use crate::config::DrainConfig;
use crate::error::{error_chain, AcquisitionStage, DrainError};
use crate::target::DrainTarget;
use crate::telemetry::{ScopedTelemetry, DRAIN_RATE_METRIC, MESSAGES_DRAINED_METRIC};
use futures::FutureExt;
use queue_runtime::{
    cancellable, MessageReceiver, QueueClient, QueueConnector, QueueError, ReceiverOptions,
};
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// How a worker left its drain loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The retry budget ran out: the target is considered empty
    Drained,
    /// The stop signal was observed
    Cancelled,
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drained => write!(f, "Drained"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What a finished worker did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub target: DrainTarget,
    pub exit: WorkerExit,
    pub receive_calls: u32,
    pub messages_drained: u64,
}

/// Messages per second, rounded to two decimals
///
/// Durations below one millisecond are treated as one millisecond.
pub fn drain_rate(count: usize, elapsed: Duration) -> f64 {
    let seconds = elapsed.max(Duration::from_millis(1)).as_secs_f64();
    ((count as f64 / seconds) * 100.0).round() / 100.0
}

/// Drains a single target
pub struct EndpointWorker {
    target: DrainTarget,
    config: Arc<DrainConfig>,
    connector: Arc<dyn QueueConnector>,
    cancel: CancellationToken,
    clock: SharedClock,
    telemetry: ScopedTelemetry,
}

impl EndpointWorker {
    pub fn new(
        target: DrainTarget,
        config: Arc<DrainConfig>,
        connector: Arc<dyn QueueConnector>,
        cancel: CancellationToken,
        clock: SharedClock,
        telemetry: ScopedTelemetry,
    ) -> Self {
        Self {
            target,
            config,
            connector,
            cancel,
            clock,
            telemetry,
        }
    }

    /// Run the worker to completion
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::ResourceAcquisition`] when the client or the
    /// receiver cannot be created, and [`DrainError::WorkerAborted`] when the
    /// drain loop panics. Everything acquired up to that point is released
    /// first.
    pub async fn run(self) -> Result<WorkerReport, DrainError> {
        info!(
            drain_target = %self.target,
            timeout_secs = self.config.receive_timeout_base.as_secs(),
            batch_size = self.config.batch_size,
            retry = self.config.max_retry_iterations,
            prefetch = ?self.config.prefetch_count,
            "Starting drain"
        );

        let mut report = WorkerReport {
            target: self.target.clone(),
            exit: WorkerExit::Cancelled,
            receive_calls: 0,
            messages_drained: 0,
        };

        if self.cancel.is_cancelled() {
            info!(drain_target = %self.target, "Stop requested before the drain started");
            self.telemetry.flush();
            return Ok(report);
        }

        let client: Arc<dyn QueueClient> =
            match cancellable(&self.cancel, self.connector.connect()).await {
                Ok(client) => Arc::from(client),
                Err(QueueError::Cancelled) => {
                    self.telemetry.flush();
                    return Ok(report);
                }
                Err(e) => {
                    let error = self.acquisition_failed(AcquisitionStage::Connect, e);
                    self.telemetry.flush();
                    return Err(error);
                }
            };
        let mut resources =
            Resources::new(&self.target, Arc::clone(&client), self.telemetry.clone());

        let options = ReceiverOptions::receive_and_delete(self.target.sub_queue())
            .with_prefetch_count(self.config.prefetch_count);
        let opened = cancellable(
            &self.cancel,
            client.open_receiver(self.target.topic(), self.target.subscription(), options),
        )
        .await;

        let receiver: Arc<dyn MessageReceiver> = match opened {
            Ok(receiver) => Arc::from(receiver),
            Err(e) if e.is_cancellation() => {
                resources.release().await;
                return Ok(report);
            }
            Err(e) => {
                let error = self.acquisition_failed(AcquisitionStage::OpenReceiver, e);
                resources.release().await;
                return Err(error);
            }
        };
        resources.receiver = Some(Arc::clone(&receiver));

        let drained = AssertUnwindSafe(self.drain(receiver.as_ref(), &mut report))
            .catch_unwind()
            .await;

        // Closing
        let outcome = match drained {
            Ok(exit) => {
                report.exit = exit;
                info!(drain_target = %self.target, exit = %exit, "Closing receiver");
                Ok(())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    drain_target = %self.target,
                    panic = %message,
                    "Drain loop panicked, releasing resources"
                );
                Err(DrainError::WorkerAborted {
                    target: self.target.to_string(),
                    message: "worker panicked".to_string(),
                })
            }
        };
        drop(receiver);
        drop(client);
        resources.release().await;
        outcome?;

        info!(
            drain_target = %self.target,
            exit = %report.exit,
            receive_calls = report.receive_calls,
            messages_drained = report.messages_drained,
            "Drain finished"
        );

        Ok(report)
    }

    async fn drain(
        &self,
        receiver: &dyn MessageReceiver,
        report: &mut WorkerReport,
    ) -> WorkerExit {
        let backoff = BackoffController::from_config(&self.config);
        let mut state = RetryState::new();

        loop {
            if self.cancel.is_cancelled() {
                return WorkerExit::Cancelled;
            }

            let iteration_start = self.clock.elapsed();
            let wait = backoff.wait_duration(state.iteration());
            report.receive_calls += 1;

            let received = cancellable(
                &self.cancel,
                receiver.receive_batch(self.config.batch_size, wait, &self.cancel),
            )
            .await;

            let outcome = match received {
                Ok(batch) => BatchOutcome::from_count(batch.len()),
                Err(e) if e.is_cancellation() => {
                    info!(
                        drain_target = %self.target,
                        iteration = state.iteration(),
                        "Receive cancelled"
                    );
                    return WorkerExit::Cancelled;
                }
                Err(e) => {
                    warn!(
                        drain_target = %self.target,
                        iteration = state.iteration(),
                        transient = e.is_transient(),
                        error = %e,
                        error_chain = %error_chain(&e),
                        "Receive failed"
                    );
                    self.telemetry.record_exception(&e);
                    BatchOutcome::TransientError
                }
            };

            let count = outcome.message_count();
            report.messages_drained += count as u64;
            self.telemetry
                .record_metric(MESSAGES_DRAINED_METRIC, count as f64);
            if count > 0 {
                let elapsed = self.clock.elapsed().saturating_sub(iteration_start);
                self.telemetry
                    .record_metric(DRAIN_RATE_METRIC, drain_rate(count, elapsed));
            }

            info!(
                drain_target = %self.target,
                iteration = state.iteration(),
                wait_secs = wait.as_secs(),
                received = count,
                "Receive completed"
            );

            let decision = backoff.next(state, outcome);
            state = decision.state;
            if !decision.proceed {
                return WorkerExit::Drained;
            }
        }
    }

    fn acquisition_failed(&self, stage: AcquisitionStage, source: QueueError) -> DrainError {
        error!(
            drain_target = %self.target,
            stage = %stage,
            error = %error_chain(&source),
            "Failed to acquire transport resources"
        );
        self.telemetry.record_exception(&source);

        DrainError::ResourceAcquisition {
            target: self.target.to_string(),
            stage,
            source,
        }
    }
}

// ============================================================================
// Resource release
// ============================================================================

/// Transport handles and telemetry a worker must release exactly once
///
/// [`Resources::release`] closes the receiver, disposes the client and flushes
/// telemetry. Whatever is still held when the value is dropped (the worker
/// task was aborted, or unwound outside the drain loop) is released on a
/// spawned task instead.
struct Resources {
    target: String,
    client: Option<Arc<dyn QueueClient>>,
    receiver: Option<Arc<dyn MessageReceiver>>,
    telemetry: Option<ScopedTelemetry>,
}

impl Resources {
    fn new(target: &DrainTarget, client: Arc<dyn QueueClient>, telemetry: ScopedTelemetry) -> Self {
        Self {
            target: target.to_string(),
            client: Some(client),
            receiver: None,
            telemetry: Some(telemetry),
        }
    }

    async fn release(mut self) {
        // Each handle is taken before it is released so that an abort part way
        // through never releases it twice
        if let Some(receiver) = self.receiver.take() {
            close_receiver(&self.target, receiver.as_ref()).await;
        }
        if let Some(client) = self.client.take() {
            dispose_client(&self.target, client.as_ref()).await;
        }
        if let Some(telemetry) = self.telemetry.take() {
            telemetry.flush();
        }
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        let receiver = self.receiver.take();
        let client = self.client.take();
        let Some(telemetry) = self.telemetry.take() else {
            return;
        };

        warn!(drain_target = %self.target, "Worker interrupted, releasing resources");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            telemetry.flush();
            return;
        };

        let target = std::mem::take(&mut self.target);
        handle.spawn(async move {
            if let Some(receiver) = receiver {
                close_receiver(&target, receiver.as_ref()).await;
            }
            if let Some(client) = client {
                dispose_client(&target, client.as_ref()).await;
            }
            telemetry.flush();
        });
    }
}

async fn close_receiver(target: &str, receiver: &dyn MessageReceiver) {
    if let Err(e) = receiver.close().await {
        warn!(drain_target = %target, error = %e, "Failed to close receiver");
    }
}

async fn dispose_client(target: &str, client: &dyn QueueClient) {
    if let Err(e) = client.dispose().await {
        warn!(drain_target = %target, error = %e, "Failed to dispose client");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
