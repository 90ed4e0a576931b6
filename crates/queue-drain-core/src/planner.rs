//! # Target Planner
//!
//! Expands a topic, its subscriptions and a queue-kind selection into the
//! ordered list of drain targets for a run.

use crate::error::ConfigurationError;
use crate::target::DrainTarget;
use bitflags::bitflags;
use queue_runtime::{SubQueue, SubscriptionName, TopicName};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
#[path = "planner_tests.rs"]
mod tests;

bitflags! {
    /// Which queues of each subscription to drain
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct QueueSelector: u8 {
        const MAIN = 0b01;
        const DEAD_LETTER = 0b10;
    }
}

impl QueueSelector {
    /// Selected sub-queues, main queue first
    pub fn sub_queues(self) -> impl Iterator<Item = SubQueue> {
        [
            (Self::MAIN, SubQueue::Main),
            (Self::DEAD_LETTER, SubQueue::DeadLetter),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, sub_queue)| sub_queue)
    }
}

impl FromStr for QueueSelector {
    type Err = ConfigurationError;

    /// Accepts `main`, `dead-letter` (or `deadletter`, `dlq`) and `all`
    /// (or `both`), case-insensitively
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" => Ok(Self::MAIN),
            "dead-letter" | "deadletter" | "dlq" => Ok(Self::DEAD_LETTER),
            "all" | "both" => Ok(Self::all()),
            other => Err(ConfigurationError::InvalidValue {
                field: "queue".to_string(),
                message: format!("'{}' is not one of main, dead-letter, all", other),
            }),
        }
    }
}

impl fmt::Display for QueueSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::all() {
            write!(f, "all")
        } else if *self == Self::MAIN {
            write!(f, "main")
        } else if *self == Self::DEAD_LETTER {
            write!(f, "dead-letter")
        } else {
            write!(f, "none")
        }
    }
}

/// Build the drain targets for a run
///
/// Targets are ordered subscription-major in input order; within a
/// subscription the main queue comes before the dead letter queue.
///
/// # Errors
///
/// Fails when no subscription or no queue kind is given, when a name is
/// invalid, or when a subscription is listed twice.
///
/// # Examples
///
/// ```rust
/// use queue_drain_core::planner::{plan_targets, QueueSelector};
///
/// let targets = plan_targets("contoso", "orders", &["audit", "billing"], QueueSelector::all())
///     .unwrap();
///
/// let names: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
/// assert_eq!(
///     names,
///     vec![
///         "contoso/orders/Subscriptions/audit",
///         "contoso/orders/Subscriptions/audit/$DeadLetterQueue",
///         "contoso/orders/Subscriptions/billing",
///         "contoso/orders/Subscriptions/billing/$DeadLetterQueue",
///     ]
/// );
/// ```
pub fn plan_targets<S: AsRef<str>>(
    namespace: &str,
    topic: &str,
    subscriptions: &[S],
    selector: QueueSelector,
) -> Result<Vec<DrainTarget>, ConfigurationError> {
    if subscriptions.is_empty() {
        return Err(ConfigurationError::NoSubscriptions);
    }
    if selector.is_empty() {
        return Err(ConfigurationError::EmptySelector);
    }

    let topic = TopicName::new(topic)?;
    let mut seen = HashSet::new();
    let per_subscription = selector.bits().count_ones() as usize;
    let mut targets = Vec::with_capacity(subscriptions.len() * per_subscription);

    for name in subscriptions {
        let subscription = SubscriptionName::new(name.as_ref())?;
        if !seen.insert(subscription.clone()) {
            return Err(ConfigurationError::DuplicateSubscription {
                name: subscription.to_string(),
            });
        }

        for sub_queue in selector.sub_queues() {
            targets.push(DrainTarget::new(
                namespace,
                topic.clone(),
                subscription.clone(),
                sub_queue,
            ));
        }
    }

    Ok(targets)
}
