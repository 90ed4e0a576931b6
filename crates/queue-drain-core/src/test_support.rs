//! Scripted transport used by the worker and coordinator tests.
//!
//! Every entity path gets a script of receive steps. Once a script runs out,
//! receives behave like an empty queue and wait out their full budget.

use async_trait::async_trait;
use queue_runtime::{
    entity_path, MessageId, MessageReceiver, ProviderType, QueueClient, QueueConnector,
    QueueError, ReceivedMessage, ReceiverOptions, SubQueue, SubscriptionName, TopicName,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Script
// ============================================================================

/// One scripted receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Return this many messages immediately
    Messages(usize),
    /// Wait out the whole budget and return nothing
    Empty,
    /// Fail with a transient connection error
    Fail,
    /// Block until cancelled
    Hang,
    /// Panic inside the receive call
    Panic,
}

#[derive(Default)]
struct EntityScript {
    steps: VecDeque<Step>,
    waits: Vec<Duration>,
    options: Option<ReceiverOptions>,
    fail_open: bool,
    panic_open: bool,
    hang_close: bool,
}

#[derive(Default)]
struct TransportState {
    entities: Mutex<HashMap<String, EntityScript>>,
    fail_connect: AtomicBool,
    hang_connect: AtomicBool,
    connects: AtomicUsize,
    disposes: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl TransportState {
    fn entities(&self) -> MutexGuard<'_, HashMap<String, EntityScript>> {
        self.entities.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Raw call counts; idempotent calls are counted every time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub connects: usize,
    pub disposes: usize,
    pub opens: usize,
    pub closes: usize,
}

/// Shared handle to a scripted namespace
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<TransportState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, path: &str, steps: impl IntoIterator<Item = Step>) -> &Self {
        self.state
            .entities()
            .entry(path.to_string())
            .or_default()
            .steps
            .extend(steps);
        self
    }

    pub fn fail_connect(&self) -> &Self {
        self.state.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn hang_connect(&self) -> &Self {
        self.state.hang_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_open(&self, path: &str) -> &Self {
        self.state
            .entities()
            .entry(path.to_string())
            .or_default()
            .fail_open = true;
        self
    }

    /// Make `open_receiver` on this entity panic
    pub fn panic_open(&self, path: &str) -> &Self {
        self.state
            .entities()
            .entry(path.to_string())
            .or_default()
            .panic_open = true;
        self
    }

    /// Make `close` on this entity's receiver never return
    pub fn hang_close(&self, path: &str) -> &Self {
        self.state
            .entities()
            .entry(path.to_string())
            .or_default()
            .hang_close = true;
        self
    }

    /// Wait budgets passed to each receive call, in order
    pub fn waits(&self, path: &str) -> Vec<Duration> {
        self.state
            .entities()
            .get(path)
            .map(|e| e.waits.clone())
            .unwrap_or_default()
    }

    pub fn options(&self, path: &str) -> Option<ReceiverOptions> {
        self.state.entities().get(path).and_then(|e| e.options)
    }

    pub fn counts(&self) -> CallCounts {
        CallCounts {
            connects: self.state.connects.load(Ordering::SeqCst),
            disposes: self.state.disposes.load(Ordering::SeqCst),
            opens: self.state.opens.load(Ordering::SeqCst),
            closes: self.state.closes.load(Ordering::SeqCst),
        }
    }

    pub fn connector(&self) -> Arc<dyn QueueConnector> {
        Arc::new(ScriptedConnector {
            state: Arc::clone(&self.state),
        })
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

struct ScriptedConnector {
    state: Arc<TransportState>,
}

#[async_trait]
impl QueueConnector for ScriptedConnector {
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.hang_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionFailed {
                message: "namespace unreachable".to_string(),
            });
        }
        Ok(Box::new(ScriptedClient {
            state: Arc::clone(&self.state),
        }))
    }

    fn namespace(&self) -> &str {
        "scripted"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

struct ScriptedClient {
    state: Arc<TransportState>,
}

#[async_trait]
impl QueueClient for ScriptedClient {
    async fn open_receiver(
        &self,
        topic: &TopicName,
        subscription: &SubscriptionName,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, QueueError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        let path = entity_path(topic, subscription, options.sub_queue);

        let (fail, panic) = {
            let mut entities = self.state.entities();
            let entity = entities.entry(path.clone()).or_default();
            entity.options = Some(options);
            (entity.fail_open, entity.panic_open)
        };
        if panic {
            panic!("scripted open panic on {}", path);
        }
        if fail {
            return Err(QueueError::EntityNotFound { entity_path: path });
        }

        Ok(Box::new(ScriptedReceiver {
            state: Arc::clone(&self.state),
            path,
        }))
    }

    async fn dispose(&self) -> Result<(), QueueError> {
        self.state.disposes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedReceiver {
    state: Arc<TransportState>,
    path: String,
}

#[async_trait]
impl MessageReceiver for ScriptedReceiver {
    fn entity_path(&self) -> &str {
        &self.path
    }

    async fn receive_batch(
        &self,
        max_messages: u32,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let step = {
            let mut entities = self.state.entities();
            let entity = entities.entry(self.path.clone()).or_default();
            entity.waits.push(max_wait);
            entity.steps.pop_front().unwrap_or(Step::Empty)
        };

        match step {
            Step::Messages(count) => {
                let count = count.min(max_messages as usize);
                Ok((0..count)
                    .map(|_| ReceivedMessage::new(MessageId::new(), "stale".into()))
                    .collect())
            }
            Step::Empty => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(QueueError::Cancelled),
                    _ = tokio::time::sleep(max_wait) => Ok(Vec::new()),
                }
            }
            Step::Fail => Err(QueueError::ConnectionFailed {
                message: "link detached".to_string(),
            }),
            Step::Hang => {
                cancel.cancelled().await;
                Err(QueueError::Cancelled)
            }
            Step::Panic => panic!("scripted receive panic on {}", self.path),
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        let hang = self
            .state
            .entities()
            .get(&self.path)
            .map(|e| e.hang_close)
            .unwrap_or(false);
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Entity path of `orders/Subscriptions/{subscription}` (or its dead letter queue)
pub fn path_of(subscription: &str, sub_queue: SubQueue) -> String {
    entity_path(
        &TopicName::new("orders").expect("valid topic"),
        &SubscriptionName::new(subscription).expect("valid subscription"),
        sub_queue,
    )
}
