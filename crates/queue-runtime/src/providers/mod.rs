//! Queue provider implementations.
//!
//! This module contains concrete implementations of the `QueueConnector`,
//! `QueueClient` and `MessageReceiver` traits for different backends.

pub mod azure;
pub mod memory;

pub use azure::{AzureError, AzureServiceBusConnector};
pub use memory::{InMemoryConnector, InMemoryNamespace, InMemoryStats};
