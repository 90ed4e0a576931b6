//! Drain targets: one subscription (sub-)queue to empty.

use queue_runtime::{entity_path, SubQueue, SubscriptionName, TopicName};
use std::fmt;

#[cfg(test)]
#[path = "target_tests.rs"]
mod tests;

/// One (subscription, queue kind) pair in a namespace
///
/// The display form `{namespace}/{entity_path}` identifies the target in logs
/// and telemetry and is unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrainTarget {
    namespace: String,
    topic: TopicName,
    subscription: SubscriptionName,
    sub_queue: SubQueue,
    entity_path: String,
}

impl DrainTarget {
    pub fn new(
        namespace: impl Into<String>,
        topic: TopicName,
        subscription: SubscriptionName,
        sub_queue: SubQueue,
    ) -> Self {
        let entity_path = entity_path(&topic, &subscription, sub_queue);
        Self {
            namespace: namespace.into(),
            topic,
            subscription,
            sub_queue,
            entity_path,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn subscription(&self) -> &SubscriptionName {
        &self.subscription
    }

    pub fn sub_queue(&self) -> SubQueue {
        self.sub_queue
    }

    /// Service Bus entity path, e.g. `orders/Subscriptions/audit/$DeadLetterQueue`
    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }
}

impl fmt::Display for DrainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.entity_path)
    }
}
