//! # Queue Runtime
//!
//! Transport layer used by the drain engine to pull messages out of Azure
//! Service Bus topic subscriptions.
//!
//! This library provides:
//! - Provider-agnostic connector, client and receiver traits
//! - Cancellable batch receives with a bounded wait budget
//! - Dead letter sub-queue addressing
//! - An Azure Service Bus provider speaking the REST API
//! - An in-memory provider for tests and local experiments
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all transport operations
//! - [`message`] - Entity names and received message structures
//! - [`provider`] - Provider types and receiver options
//! - [`connection`] - Service Bus connection string parsing
//! - [`client`] - Connector, client and receiver traits
//! - [`providers`] - Concrete provider implementations

// Module declarations
pub mod client;
pub mod connection;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{cancellable, deadline_after, MessageReceiver, QueueClient, QueueConnector};
pub use connection::ConnectionString;
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{MessageId, ReceivedMessage, SubscriptionName, Timestamp, TopicName};
pub use provider::{
    entity_path, AzureServiceBusConfig, ProviderType, ReceiveMode, ReceiverOptions, SubQueue,
};
pub use providers::{
    AzureError, AzureServiceBusConnector, InMemoryConnector, InMemoryNamespace, InMemoryStats,
};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
