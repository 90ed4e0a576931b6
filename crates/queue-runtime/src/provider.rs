//! Provider types, receiver options and entity addressing.

use crate::message::{SubscriptionName, TopicName};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    AzureServiceBus,
    InMemory,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AzureServiceBus => write!(f, "AzureServiceBus"),
            Self::InMemory => write!(f, "InMemory"),
        }
    }
}

/// Which queue of a subscription a receiver reads from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum SubQueue {
    /// The primary delivery path of the subscription
    #[default]
    Main,
    /// The `$DeadLetterQueue` sub-queue
    DeadLetter,
}

impl SubQueue {
    /// Suffix appended to the subscription path to address this sub-queue
    pub fn path_suffix(&self) -> &'static str {
        match self {
            Self::Main => "",
            Self::DeadLetter => "/$DeadLetterQueue",
        }
    }
}

impl std::fmt::Display for SubQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "Main"),
            Self::DeadLetter => write!(f, "DeadLetter"),
        }
    }
}

/// Build the Service Bus entity path of a subscription (sub-)queue
///
/// ```rust
/// use queue_runtime::{entity_path, SubQueue, SubscriptionName, TopicName};
///
/// let topic = TopicName::new("orders").unwrap();
/// let subscription = SubscriptionName::new("audit").unwrap();
///
/// assert_eq!(
///     entity_path(&topic, &subscription, SubQueue::DeadLetter),
///     "orders/Subscriptions/audit/$DeadLetterQueue"
/// );
/// ```
pub fn entity_path(
    topic: &TopicName,
    subscription: &SubscriptionName,
    sub_queue: SubQueue,
) -> String {
    format!(
        "{}/Subscriptions/{}{}",
        topic.as_str(),
        subscription.as_str(),
        sub_queue.path_suffix()
    )
}

/// How a receive call settles the messages it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReceiveMode {
    /// Messages are deleted by the receive itself
    #[default]
    ReceiveAndDelete,
    /// Messages are locked and must be settled separately
    PeekLock,
}

/// Options used when opening a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiverOptions {
    pub receive_mode: ReceiveMode,
    pub sub_queue: SubQueue,
    /// Number of messages the client may buffer ahead of receive calls
    pub prefetch_count: Option<u32>,
}

impl ReceiverOptions {
    /// Receive-and-delete options for the given sub-queue
    pub fn receive_and_delete(sub_queue: SubQueue) -> Self {
        Self {
            receive_mode: ReceiveMode::ReceiveAndDelete,
            sub_queue,
            prefetch_count: None,
        }
    }

    /// Set the prefetch count
    pub fn with_prefetch_count(mut self, prefetch_count: Option<u32>) -> Self {
        self.prefetch_count = prefetch_count;
        self
    }
}

/// Azure Service Bus provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureServiceBusConfig {
    /// `Endpoint=sb://...;SharedAccessKeyName=...;SharedAccessKey=...`
    pub connection_string: String,
    /// Slack added on top of the server-side wait for each HTTP request
    pub request_timeout: Duration,
    /// Lifetime of generated SAS tokens
    pub token_ttl: Duration,
}

impl AzureServiceBusConfig {
    /// Configuration with default timeouts for the given connection string
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            request_timeout: Duration::from_secs(30),
            token_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
