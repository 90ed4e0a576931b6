//! Shared fixtures for the drain integration tests
//!
//! Every test gets its own in-memory namespace with an `orders` topic and
//! whatever subscriptions it asks for.

use queue_drain_core::{
    plan_targets, DrainConfig, DrainCoordinator, DrainTarget, QueueSelector, TelemetrySink,
};
use queue_runtime::{InMemoryNamespace, SubQueue, SubscriptionName, TopicName};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "contoso";
pub const TOPIC: &str = "orders";

/// An in-memory namespace seeded with subscriptions
pub struct Fixture {
    pub namespace: InMemoryNamespace,
    pub topic: TopicName,
}

impl Fixture {
    pub fn new(subscriptions: &[&str]) -> Self {
        let namespace = InMemoryNamespace::new(NAMESPACE);
        let topic = TopicName::new(TOPIC).unwrap();
        for name in subscriptions {
            namespace.create_subscription(&topic, &subscription(name));
        }
        Self { namespace, topic }
    }

    /// Put `count` messages on the main queue of `name`
    pub fn fill(&self, name: &str, count: usize) {
        for i in 0..count {
            self.namespace
                .send(&self.topic, &subscription(name), format!("{}-{}", name, i))
                .unwrap();
        }
    }

    /// Put `count` messages on the dead letter queue of `name`
    pub fn fill_dead_letter(&self, name: &str, count: usize) {
        for i in 0..count {
            self.namespace
                .dead_letter(&self.topic, &subscription(name), format!("poison-{}", i))
                .unwrap();
        }
    }

    pub fn depth(&self, name: &str, sub_queue: SubQueue) -> usize {
        self.namespace
            .depth(&self.topic, &subscription(name), sub_queue)
    }

    #[allow(dead_code)]
    pub fn receive_calls(&self, name: &str, sub_queue: SubQueue) -> u64 {
        self.namespace
            .receive_calls(&self.topic, &subscription(name), sub_queue)
    }

    pub fn targets(&self, subscriptions: &[&str], selector: QueueSelector) -> Vec<DrainTarget> {
        plan_targets(NAMESPACE, TOPIC, subscriptions, selector).unwrap()
    }

    pub fn coordinator(
        &self,
        config: DrainConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> DrainCoordinator {
        DrainCoordinator::new(config, Arc::new(self.namespace.connector()), telemetry)
    }
}

#[allow(dead_code)]
pub fn subscription(name: &str) -> SubscriptionName {
    SubscriptionName::new(name).unwrap()
}

/// Small, fast configuration: 1s base wait and three empty receives to finish
pub fn quick_config() -> DrainConfig {
    DrainConfig::default()
        .with_receive_timeout_base(Duration::from_secs(1))
        .with_max_retry_iterations(3)
}
