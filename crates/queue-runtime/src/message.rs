//! Entity names and received message types.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Entity Names
// ============================================================================

/// Validated Service Bus topic name
///
/// Topic names may be 1-260 characters of ASCII letters, digits, periods,
/// hyphens, underscores and forward slashes. They must start and end with a
/// letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicName(String);

impl TopicName {
    /// Create new topic name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_entity_name("topic_name", &name, 260, true)?;
        Ok(Self(name))
    }

    /// Get topic name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TopicName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Validated Service Bus subscription name
///
/// Subscription names may be 1-50 characters of ASCII letters, digits,
/// periods, hyphens and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionName(String);

impl SubscriptionName {
    /// Create new subscription name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_entity_name("subscription_name", &name, 50, false)?;
        Ok(Self(name))
    }

    /// Get subscription name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriptionName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

fn validate_entity_name(
    field: &str,
    name: &str,
    max_len: usize,
    allow_slash: bool,
) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > max_len {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            message: format!("must be 1-{} characters", max_len),
        });
    }

    if !name.chars().all(|c| {
        c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || (allow_slash && c == '/')
    }) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "only ASCII alphanumeric, periods, hyphens, and underscores allowed"
                .to_string(),
        });
    }

    let first = name.chars().next();
    let last = name.chars().last();
    if !first.is_some_and(|c| c.is_ascii_alphanumeric())
        || !last.is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: "must start and end with a letter or digit".to_string(),
        });
    }

    Ok(())
}

// ============================================================================
// Message Identifiers
// ============================================================================

/// Identifier assigned to a message by the broker (or the in-memory provider)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse an RFC 2822 timestamp as used by Service Bus broker properties
    pub fn parse_rfc2822(value: &str) -> Result<Self, chrono::ParseError> {
        let dt = DateTime::parse_from_rfc2822(value)?;
        Ok(Self(dt.with_timezone(&Utc)))
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Received Messages
// ============================================================================

/// A message removed (or locked) by a receive call
///
/// The drain engine only counts these; the body and broker metadata are kept
/// so that callers can log or archive what was purged.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub sequence_number: Option<i64>,
    pub delivery_count: u32,
    pub enqueued_at: Option<Timestamp>,
    /// Lock token for peek-lock receives; `None` for receive-and-delete
    pub lock_token: Option<String>,
    pub properties: HashMap<String, String>,
}

impl ReceivedMessage {
    /// Create a received message with only an ID and a body
    pub fn new(message_id: MessageId, body: Bytes) -> Self {
        Self {
            message_id,
            body,
            sequence_number: None,
            delivery_count: 1,
            enqueued_at: None,
            lock_token: None,
            properties: HashMap::new(),
        }
    }

    /// Body size in bytes
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
