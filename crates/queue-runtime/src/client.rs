//! Connector, client and receiver traits.
//!
//! The drain engine only needs a narrow slice of a messaging SDK:
//!
//! 1. [`QueueConnector::connect`] produces a [`QueueClient`] for a namespace
//! 2. [`QueueClient::open_receiver`] opens a [`MessageReceiver`] on one
//!    subscription (or its dead letter sub-queue)
//! 3. [`MessageReceiver::receive_batch`] pulls up to `max_messages`, waiting at
//!    most `max_wait` and aborting as soon as the cancellation token fires
//! 4. [`MessageReceiver::close`] and [`QueueClient::dispose`] release the
//!    handles; both are idempotent

use crate::error::QueueError;
use crate::message::{ReceivedMessage, SubscriptionName, TopicName};
use crate::provider::{ProviderType, ReceiverOptions};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Creates clients for one namespace
#[async_trait]
pub trait QueueConnector: Send + Sync {
    /// Establish a client connection
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError>;

    /// Short namespace name used for telemetry scopes
    fn namespace(&self) -> &str;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// A live connection to a namespace
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Open a receiver on a topic subscription
    async fn open_receiver(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, QueueError>;

    /// Release the connection. Calling this more than once is a no-op.
    async fn dispose(&self) -> Result<(), QueueError>;
}

/// Receives messages from a single subscription (sub-)queue
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Entity path this receiver reads from
    fn entity_path(&self) -> &str;

    /// Receive up to `max_messages`, waiting at most `max_wait` for the first one
    ///
    /// May return fewer messages than requested, including none. Returns
    /// [`QueueError::Cancelled`] if `cancel` fires while the call is in flight.
    async fn receive_batch(
        &self,
        max_messages: u32,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Close the receiver. Calling this more than once is a no-op.
    async fn close(&self) -> Result<(), QueueError>;
}

/// Instant `wait` from now, clamped to a far-future instant on overflow
pub fn deadline_after(wait: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(wait).unwrap_or_else(|| now + FAR_FUTURE)
}

// Roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Race a transport operation against a cancellation token
///
/// Cancellation wins ties, so a token that is already cancelled never lets
/// the operation start doing work.
pub async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T, QueueError>
where
    F: Future<Output = Result<T, QueueError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueueError::Cancelled),
        result = operation => result,
    }
}
