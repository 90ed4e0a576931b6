//! In-memory queue provider implementation for testing and development.
//!
//! This module provides an in-memory namespace that:
//! - Holds topic subscriptions with a main queue and a dead letter sub-queue
//! - Serves cancellable batch receives that wake up as soon as a message lands
//! - Can simulate unreachable namespaces and failing receive calls
//! - Counts connections, disposals and receiver open/close calls
//!
//! All receives use receive-and-delete semantics; there are no locks to settle.

use crate::client::{deadline_after, MessageReceiver, QueueClient, QueueConnector};
use crate::error::QueueError;
use crate::message::{MessageId, ReceivedMessage, SubscriptionName, Timestamp, TopicName};
use crate::provider::{entity_path, ProviderType, ReceiverOptions, SubQueue};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// State shared by a namespace and every client created from it
struct NamespaceState {
    name: String,
    entities: Mutex<HashMap<String, EntityQueue>>,
    /// Woken whenever a message is added to any entity
    arrivals: Notify,
    unreachable: AtomicBool,
    next_sequence_number: AtomicI64,
    connects: AtomicUsize,
    disposes: AtomicUsize,
    receivers_opened: AtomicUsize,
    receivers_closed: AtomicUsize,
}

impl NamespaceState {
    fn entities(&self) -> MutexGuard<'_, HashMap<String, EntityQueue>> {
        // A panicking test thread must not wedge every other receiver
        self.entities.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One subscription queue or dead letter sub-queue
#[derive(Default)]
struct EntityQueue {
    messages: VecDeque<ReceivedMessage>,
    failures_remaining: u32,
    receive_calls: u64,
}

/// Counters describing how a namespace has been used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryStats {
    pub connects: usize,
    pub disposes: usize,
    pub receivers_opened: usize,
    pub receivers_closed: usize,
}

// ============================================================================
// InMemoryNamespace
// ============================================================================

/// An in-memory stand-in for a Service Bus namespace
///
/// Cloning is cheap; clones share the same entities.
#[derive(Clone)]
pub struct InMemoryNamespace {
    state: Arc<NamespaceState>,
}

impl InMemoryNamespace {
    /// Create an empty namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(NamespaceState {
                name: name.into(),
                entities: Mutex::new(HashMap::new()),
                arrivals: Notify::new(),
                unreachable: AtomicBool::new(false),
                next_sequence_number: AtomicI64::new(1),
                connects: AtomicUsize::new(0),
                disposes: AtomicUsize::new(0),
                receivers_opened: AtomicUsize::new(0),
                receivers_closed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Create a subscription together with its dead letter sub-queue
    ///
    /// Creating an existing subscription leaves its messages untouched.
    pub fn create_subscription(&self, topic: &TopicName, subscription: &SubscriptionName) {
        let mut entities = self.state.entities();
        for sub_queue in [SubQueue::Main, SubQueue::DeadLetter] {
            entities
                .entry(entity_path(topic, subscription, sub_queue))
                .or_default();
        }
    }

    /// Deliver a message to the main queue of a subscription
    pub fn send(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        body: impl Into<Bytes>,
    ) -> Result<MessageId, QueueError> {
        self.enqueue(
            entity_path(topic, subscription, SubQueue::Main),
            body.into(),
        )
    }

    /// Place a message directly on the dead letter sub-queue of a subscription
    pub fn dead_letter(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        body: impl Into<Bytes>,
    ) -> Result<MessageId, QueueError> {
        self.enqueue(
            entity_path(topic, subscription, SubQueue::DeadLetter),
            body.into(),
        )
    }

    fn enqueue(&self, path: String, body: Bytes) -> Result<MessageId, QueueError> {
        let message_id = MessageId::new();
        {
            let mut entities = self.state.entities();
            let entity = entities
                .get_mut(&path)
                .ok_or_else(|| QueueError::EntityNotFound { entity_path: path })?;

            let mut message = ReceivedMessage::new(message_id.clone(), body);
            message.sequence_number = Some(
                self.state
                    .next_sequence_number
                    .fetch_add(1, Ordering::SeqCst),
            );
            message.enqueued_at = Some(Timestamp::now());
            entity.messages.push_back(message);
        }

        self.state.arrivals.notify_waiters();
        Ok(message_id)
    }

    /// Number of messages waiting in a (sub-)queue; zero for unknown entities
    pub fn depth(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        sub_queue: SubQueue,
    ) -> usize {
        self.state
            .entities()
            .get(&entity_path(topic, subscription, sub_queue))
            .map(|e| e.messages.len())
            .unwrap_or(0)
    }

    /// Number of receive calls made against a (sub-)queue
    pub fn receive_calls(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        sub_queue: SubQueue,
    ) -> u64 {
        self.state
            .entities()
            .get(&entity_path(topic, subscription, sub_queue))
            .map(|e| e.receive_calls)
            .unwrap_or(0)
    }

    /// Make the next `count` receive calls on a (sub-)queue fail with a
    /// transient connection error
    pub fn inject_receive_failures(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        sub_queue: SubQueue,
        count: u32,
    ) {
        if let Some(entity) = self
            .state
            .entities()
            .get_mut(&entity_path(topic, subscription, sub_queue))
        {
            entity.failures_remaining = count;
        }
    }

    /// Make every subsequent `connect` call fail
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn stats(&self) -> InMemoryStats {
        InMemoryStats {
            connects: self.state.connects.load(Ordering::SeqCst),
            disposes: self.state.disposes.load(Ordering::SeqCst),
            receivers_opened: self.state.receivers_opened.load(Ordering::SeqCst),
            receivers_closed: self.state.receivers_closed.load(Ordering::SeqCst),
        }
    }

    /// Connector that creates clients for this namespace
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            namespace: self.clone(),
        }
    }
}

// ============================================================================
// Connector, client and receiver
// ============================================================================

/// Connector for an [`InMemoryNamespace`]
#[derive(Clone)]
pub struct InMemoryConnector {
    namespace: InMemoryNamespace,
}

#[async_trait]
impl QueueConnector for InMemoryConnector {
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError> {
        let state = &self.namespace.state;
        if state.unreachable.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionFailed {
                message: format!("namespace '{}' is unreachable", state.name),
            });
        }

        state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryClient {
            state: Arc::clone(state),
            disposed: AtomicBool::new(false),
        }))
    }

    fn namespace(&self) -> &str {
        self.namespace.name()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

struct InMemoryClient {
    state: Arc<NamespaceState>,
    disposed: AtomicBool,
}

#[async_trait]
impl QueueClient for InMemoryClient {
    async fn open_receiver(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(QueueError::ClientDisposed);
        }

        let path = entity_path(topic, subscription, options.sub_queue);
        if !self.state.entities().contains_key(&path) {
            return Err(QueueError::EntityNotFound { entity_path: path });
        }

        if let Some(prefetch) = options.prefetch_count {
            debug!(entity_path = %path, prefetch, "Prefetch has no effect in memory");
        }

        self.state.receivers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryReceiver {
            state: Arc::clone(&self.state),
            entity_path: path,
            closed: AtomicBool::new(false),
        }))
    }

    async fn dispose(&self) -> Result<(), QueueError> {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.state.disposes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct InMemoryReceiver {
    state: Arc<NamespaceState>,
    entity_path: String,
    closed: AtomicBool,
}

impl InMemoryReceiver {
    /// Take up to `max_messages`; `None` when the entity is empty
    fn try_take(&self, max_messages: u32) -> Result<Option<Vec<ReceivedMessage>>, QueueError> {
        let mut entities = self.state.entities();
        let entity = entities
            .get_mut(&self.entity_path)
            .ok_or_else(|| QueueError::EntityNotFound {
                entity_path: self.entity_path.clone(),
            })?;

        if entity.failures_remaining > 0 {
            entity.failures_remaining -= 1;
            return Err(QueueError::ConnectionFailed {
                message: format!("injected receive failure on '{}'", self.entity_path),
            });
        }

        if entity.messages.is_empty() {
            return Ok(None);
        }

        let count = entity.messages.len().min(max_messages as usize);
        Ok(Some(entity.messages.drain(..count).collect()))
    }

    fn record_receive_call(&self) {
        if let Some(entity) = self.state.entities().get_mut(&self.entity_path) {
            entity.receive_calls += 1;
        }
    }
}

#[async_trait]
impl MessageReceiver for InMemoryReceiver {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn receive_batch(
        &self,
        max_messages: u32,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ReceiverClosed {
                entity_path: self.entity_path.clone(),
            });
        }
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }

        self.record_receive_call();
        let deadline = deadline_after(max_wait);

        loop {
            // Register for wake-ups before looking so a concurrent send is not missed
            let notified = self.state.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(batch) = self.try_take(max_messages)? {
                return Ok(batch);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => continue,
                _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
            }
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.receivers_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
