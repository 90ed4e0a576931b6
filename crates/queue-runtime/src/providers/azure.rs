//! Azure Service Bus provider implementation.
//!
//! This module talks to Service Bus through its REST interface:
//! - Shared access signature (SAS) authentication from a connection string
//! - Receive-and-delete (`DELETE .../messages/head`) and peek-lock
//!   (`POST .../messages/head`) receives
//! - Dead letter sub-queue addressing
//! - Error classification by HTTP status for retry decisions
//!
//! ## Batch receives
//!
//! The REST interface hands out one message per request. A batch is assembled
//! from sequential requests: the first waits for the full budget, follow-up
//! requests only wait [`FOLLOW_UP_WAIT`] so that a drained entity ends the
//! batch quickly. No follow-up starts once the wait budget has elapsed.
//! Messages removed before a later request fails are still returned, because
//! receive-and-delete has already taken them off the broker.
//!
//! ## Example
//!
//! ```no_run
//! use queue_runtime::{AzureServiceBusConfig, AzureServiceBusConnector, QueueConnector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AzureServiceBusConfig::new(
//!     "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=reader;SharedAccessKey=...",
//! );
//! let connector = AzureServiceBusConnector::new(config)?;
//! let client = connector.connect().await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{cancellable, deadline_after, MessageReceiver, QueueClient, QueueConnector};
use crate::connection::ConnectionString;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{MessageId, ReceivedMessage, SubscriptionName, Timestamp, TopicName};
use crate::provider::{
    entity_path, AzureServiceBusConfig, ProviderType, ReceiveMode, ReceiverOptions,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "azure_tests.rs"]
mod tests;

/// Server-side wait used for every request after the first one in a batch
pub const FOLLOW_UP_WAIT: Duration = Duration::from_secs(1);

/// Tokens closer than this to expiry are regenerated
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

const PROVIDER_NAME: &str = "AzureServiceBus";
const BROKER_PROPERTIES_HEADER: &str = "BrokerProperties";

// ============================================================================
// Error Types
// ============================================================================

/// Azure Service Bus specific errors
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Service Bus error ({status}): {message}")]
    ServiceBusError { status: u16, message: String },

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Invalid broker property '{key}': {message}")]
    BrokerPropertyError { key: String, message: String },
}

impl AzureError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AuthenticationError(_) => false,
            Self::AccessDenied(_) => false,
            Self::EntityNotFound(_) => false,
            Self::NetworkError(_) => true,
            Self::ServiceBusError { status, .. } => *status == 429 || *status >= 500,
            Self::ConfigurationError(_) => false,
            Self::BrokerPropertyError { .. } => false,
        }
    }

    /// Map Azure error to QueueError
    pub fn to_queue_error(self) -> QueueError {
        match self {
            Self::AuthenticationError(msg) => QueueError::AuthenticationFailed { message: msg },
            Self::AccessDenied(operation) => QueueError::PermissionDenied { operation },
            Self::EntityNotFound(entity_path) => QueueError::EntityNotFound { entity_path },
            Self::NetworkError(msg) => QueueError::ConnectionFailed { message: msg },
            Self::ServiceBusError { status, message } => QueueError::ProviderError {
                provider: PROVIDER_NAME.to_string(),
                code: status.to_string(),
                message,
            },
            Self::ConfigurationError(msg) => {
                QueueError::ConfigurationError(ConfigurationError::Invalid { message: msg })
            }
            Self::BrokerPropertyError { key, message } => {
                QueueError::SerializationError(SerializationError::InvalidBrokerProperty {
                    key,
                    message,
                })
            }
        }
    }

    /// Classify a non-success HTTP status
    fn from_status(status: StatusCode, entity_path: &str, body: &str) -> Self {
        match status.as_u16() {
            401 => Self::AuthenticationError(format!("{} rejected the SAS token", entity_path)),
            403 => Self::AccessDenied(format!("receive from {}", entity_path)),
            404 | 410 => Self::EntityNotFound(entity_path.to_string()),
            code => Self::ServiceBusError {
                status: code,
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    body.to_string()
                },
            },
        }
    }
}

// ============================================================================
// Shared Access Signature Tokens
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Generates and caches SAS tokens for a namespace
///
/// The string to sign is the lower-cased, URL-encoded resource URI followed by
/// a newline and the expiry as seconds since the epoch. The signature is the
/// base64 HMAC-SHA256 of that string keyed with the shared access key.
struct SasTokenProvider {
    resource: String,
    key_name: String,
    key: Zeroizing<String>,
    ttl: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl SasTokenProvider {
    fn new(resource: &Url, key_name: &str, key: &str, ttl: Duration) -> Self {
        Self {
            resource: resource.as_str().to_string(),
            key_name: key_name.to_string(),
            key: Zeroizing::new(key.to_string()),
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Current token, regenerated when close to expiry
    fn token(&self) -> Result<String, AzureError> {
        let now = Utc::now().timestamp();
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(token) = cached.as_ref() {
            if token.expires_at - now > TOKEN_REFRESH_MARGIN_SECS {
                return Ok(token.value.clone());
            }
        }

        let expires_at = now + self.ttl.as_secs() as i64;
        let value = self.sign(expires_at)?;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }

    /// Build a token that expires at `expires_at` (seconds since the epoch)
    fn sign(&self, expires_at: i64) -> Result<String, AzureError> {
        let encoded_resource = urlencoding::encode(&self.resource.to_lowercase()).into_owned();
        let string_to_sign = format!("{}\n{}", encoded_resource, expires_at);

        let mut mac = HmacSha256::new_from_slice(self.key.as_bytes())
            .map_err(|e| AzureError::ConfigurationError(format!("invalid SAS key: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_resource,
            urlencoding::encode(&signature),
            expires_at,
            urlencoding::encode(&self.key_name)
        ))
    }
}

// ============================================================================
// Broker Properties
// ============================================================================

/// Subset of the `BrokerProperties` response header
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties {
    message_id: Option<String>,
    sequence_number: Option<i64>,
    delivery_count: Option<u32>,
    enqueued_time_utc: Option<String>,
    lock_token: Option<String>,
}

impl BrokerProperties {
    fn parse(header: &str) -> Result<Self, AzureError> {
        serde_json::from_str(header).map_err(|e| AzureError::BrokerPropertyError {
            key: BROKER_PROPERTIES_HEADER.to_string(),
            message: e.to_string(),
        })
    }

    fn into_message(self, body: bytes::Bytes) -> Result<ReceivedMessage, AzureError> {
        let message_id = self
            .message_id
            .and_then(|id| id.parse::<MessageId>().ok())
            .unwrap_or_default();
        let enqueued_at = self
            .enqueued_time_utc
            .as_deref()
            .map(Timestamp::parse_rfc2822)
            .transpose()
            .map_err(|e| AzureError::BrokerPropertyError {
                key: "EnqueuedTimeUtc".to_string(),
                message: e.to_string(),
            })?;

        let mut message = ReceivedMessage::new(message_id, body);
        message.sequence_number = self.sequence_number;
        message.delivery_count = self.delivery_count.unwrap_or(1);
        message.enqueued_at = enqueued_at;
        message.lock_token = self.lock_token;
        Ok(message)
    }
}

// ============================================================================
// Connector
// ============================================================================

/// State shared by a connector and the clients and receivers it creates
struct AzureShared {
    namespace: String,
    base_url: Url,
    http_client: HttpClient,
    signer: SasTokenProvider,
    request_timeout: Duration,
}

/// Azure Service Bus connector
///
/// Connecting is cheap: no request is made until the first receive, so an
/// invalid key or a missing entity surfaces as a receive error.
#[derive(Clone)]
pub struct AzureServiceBusConnector {
    shared: Arc<AzureShared>,
}

impl AzureServiceBusConnector {
    /// Create a connector from provider configuration
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConfigurationError`] if the connection string is
    /// malformed or the HTTP client cannot be built.
    pub fn new(config: AzureServiceBusConfig) -> Result<Self, QueueError> {
        let connection = ConnectionString::parse(&config.connection_string)?;
        let base_url = connection.http_base_url()?;

        let http_client = HttpClient::builder().build().map_err(|e| {
            AzureError::ConfigurationError(format!("cannot build HTTP client: {}", e))
                .to_queue_error()
        })?;

        let signer = SasTokenProvider::new(
            &base_url,
            connection.shared_access_key_name(),
            connection.shared_access_key(),
            config.token_ttl,
        );

        debug!(
            namespace = connection.namespace(),
            endpoint = %base_url,
            "Created Service Bus connector"
        );

        Ok(Self {
            shared: Arc::new(AzureShared {
                namespace: connection.namespace().to_string(),
                base_url,
                http_client,
                signer,
                request_timeout: config.request_timeout,
            }),
        })
    }
}

impl fmt::Debug for AzureServiceBusConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureServiceBusConnector")
            .field("namespace", &self.shared.namespace)
            .field("base_url", &self.shared.base_url.as_str())
            .finish()
    }
}

#[async_trait]
impl QueueConnector for AzureServiceBusConnector {
    async fn connect(&self) -> Result<Box<dyn QueueClient>, QueueError> {
        // Fail early on a key that cannot sign anything
        self.shared.signer.token().map_err(AzureError::to_queue_error)?;

        Ok(Box::new(AzureServiceBusClient {
            shared: Arc::clone(&self.shared),
            disposed: AtomicBool::new(false),
        }))
    }

    fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureServiceBus
    }
}

// ============================================================================
// Client
// ============================================================================

struct AzureServiceBusClient {
    shared: Arc<AzureShared>,
    disposed: AtomicBool,
}

#[async_trait]
impl QueueClient for AzureServiceBusClient {
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
        let head_url = self
            .shared
            .base_url
            .join(&format!("{}/messages/head", path))
            .map_err(|e| {
                AzureError::ConfigurationError(format!("invalid entity path '{}': {}", path, e))
                    .to_queue_error()
            })?;

        if let Some(prefetch) = options.prefetch_count {
            debug!(
                entity_path = %path,
                prefetch,
                "Prefetch is not available over REST, ignoring"
            );
        }

        Ok(Box::new(AzureReceiver {
            shared: Arc::clone(&self.shared),
            entity_path: path,
            head_url,
            receive_mode: options.receive_mode,
            closed: AtomicBool::new(false),
        }))
    }

    async fn dispose(&self) -> Result<(), QueueError> {
        self.disposed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Receiver
// ============================================================================

struct AzureReceiver {
    shared: Arc<AzureShared>,
    entity_path: String,
    head_url: Url,
    receive_mode: ReceiveMode,
    closed: AtomicBool,
}

impl AzureReceiver {
    /// Take one message off the head of the entity; `None` when the wait ran out
    async fn receive_one(&self, wait: Duration) -> Result<Option<ReceivedMessage>, AzureError> {
        // The server timeout is whole seconds and must be at least one
        let wait_secs = wait.as_secs().max(1);
        let mut url = self.head_url.clone();
        url.query_pairs_mut()
            .append_pair("timeout", &wait_secs.to_string());

        let method = match self.receive_mode {
            ReceiveMode::ReceiveAndDelete => Method::DELETE,
            ReceiveMode::PeekLock => Method::POST,
        };

        let response = self
            .shared
            .http_client
            .request(method, url)
            .header(AUTHORIZATION, self.shared.signer.token()?)
            .header(CONTENT_LENGTH, 0)
            .timeout(Duration::from_secs(wait_secs).saturating_add(self.shared.request_timeout))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AzureError::NetworkError(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    AzureError::NetworkError(format!("Connection failed: {}", e))
                } else {
                    AzureError::NetworkError(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::from_status(status, &self.entity_path, &body));
        }

        let properties = match response.headers().get(BROKER_PROPERTIES_HEADER) {
            Some(value) => {
                let raw = value.to_str().map_err(|e| AzureError::BrokerPropertyError {
                    key: BROKER_PROPERTIES_HEADER.to_string(),
                    message: e.to_string(),
                })?;
                BrokerProperties::parse(raw)?
            }
            None => BrokerProperties::default(),
        };

        let body = response
            .bytes()
            .await
            .map_err(|e| AzureError::NetworkError(format!("Failed to read response body: {}", e)))?;

        properties.into_message(body).map(Some)
    }
}

#[async_trait]
impl MessageReceiver for AzureReceiver {
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

        let deadline = deadline_after(max_wait);
        let mut batch = Vec::new();
        while batch.len() < max_messages as usize {
            let wait = if batch.is_empty() {
                max_wait
            } else {
                // In-flight requests are never abandoned; a deleted message would be lost
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                FOLLOW_UP_WAIT.min(remaining)
            };

            let next = cancellable(cancel, async {
                self.receive_one(wait)
                    .await
                    .map_err(AzureError::to_queue_error)
            })
            .await;

            match next {
                Ok(Some(message)) => batch.push(message),
                Ok(None) => break,
                Err(e) if batch.is_empty() => return Err(e),
                Err(e) => {
                    // Already removed from the broker; hand them back rather than lose count
                    if !e.is_cancellation() {
                        warn!(
                            entity_path = %self.entity_path,
                            received = batch.len(),
                            error = %e,
                            "Receive failed part way through a batch"
                        );
                    }
                    break;
                }
            }
        }

        Ok(batch)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
