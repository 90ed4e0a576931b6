//! Tests for Azure Service Bus provider implementation.

use super::*;
use crate::provider::SubQueue;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MAIN_HEAD: &str = "/orders/Subscriptions/audit/messages/head";

fn emulator_config(server: &MockServer) -> AzureServiceBusConfig {
    AzureServiceBusConfig::new(format!(
        "Endpoint=sb://{};SharedAccessKeyName=reader;SharedAccessKey=c2VjcmV0;\
         UseDevelopmentEmulator=true",
        server.address()
    ))
}

async fn open_receiver(
    server: &MockServer,
    options: ReceiverOptions,
) -> Box<dyn MessageReceiver> {
    let connector = AzureServiceBusConnector::new(emulator_config(server)).unwrap();
    let client = connector.connect().await.unwrap();
    client
        .open_receiver(
            &TopicName::new("orders").unwrap(),
            &SubscriptionName::new("audit").unwrap(),
            options,
        )
        .await
        .unwrap()
}

fn message_response(id: &str, sequence_number: i64) -> ResponseTemplate {
    ResponseTemplate::new(201)
        .insert_header(
            "BrokerProperties",
            format!(
                r#"{{"MessageId":"{}","SequenceNumber":{},"DeliveryCount":2,"EnqueuedTimeUtc":"Tue, 04 Mar 2025 10:15:00 GMT"}}"#,
                id, sequence_number
            )
            .as_str(),
        )
        .set_body_string("payload")
}

// ============================================================================
// Authentication and Configuration Tests
// ============================================================================

mod authentication_tests {
    use super::*;

    /// Connector takes its namespace from the connection string host
    #[test]
    fn test_connector_from_portal_connection_string() {
        // Arrange
        let config = AzureServiceBusConfig::new(
            "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=reader;SharedAccessKey=dGVzdA==",
        );

        // Act
        let connector = AzureServiceBusConnector::new(config).unwrap();

        // Assert
        assert_eq!(connector.namespace(), "contoso");
        assert_eq!(connector.provider_type(), ProviderType::AzureServiceBus);
    }

    #[test]
    fn test_malformed_connection_string_is_configuration_error() {
        let result = AzureServiceBusConnector::new(AzureServiceBusConfig::new("not-a-connection"));

        assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
    }

    /// The signature must be the base64 HMAC of the encoded resource and expiry
    #[test]
    fn test_sas_token_signature() {
        // Arrange
        let resource = Url::parse("https://Contoso.servicebus.windows.net/").unwrap();
        let signer = SasTokenProvider::new(&resource, "reader", "secret", Duration::from_secs(60));

        // Act
        let token = signer.sign(1_700_000_000).unwrap();

        // Assert
        let encoded = "https%3A%2F%2Fcontoso.servicebus.windows.net%2F";
        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(format!("{}\n1700000000", encoded).as_bytes());
        let expected_sig = BASE64.encode(mac.finalize().into_bytes());

        assert_eq!(
            token,
            format!(
                "SharedAccessSignature sr={}&sig={}&se=1700000000&skn=reader",
                encoded,
                urlencoding::encode(&expected_sig)
            )
        );
    }

    #[test]
    fn test_sas_token_is_cached_until_close_to_expiry() {
        let resource = Url::parse("https://contoso.servicebus.windows.net/").unwrap();
        let signer =
            SasTokenProvider::new(&resource, "reader", "secret", Duration::from_secs(3600));

        let first = signer.token().unwrap();
        let second = signer.token().unwrap();

        assert_eq!(first, second);
        assert!(first.starts_with("SharedAccessSignature sr="));
    }
}

// ============================================================================
// Error Classification Tests
// ============================================================================

mod error_classification_tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let entity = "orders/Subscriptions/audit";

        assert!(matches!(
            AzureError::from_status(StatusCode::UNAUTHORIZED, entity, "").to_queue_error(),
            QueueError::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            AzureError::from_status(StatusCode::FORBIDDEN, entity, "").to_queue_error(),
            QueueError::PermissionDenied { .. }
        ));
        assert!(matches!(
            AzureError::from_status(StatusCode::GONE, entity, "").to_queue_error(),
            QueueError::EntityNotFound { .. }
        ));
    }

    #[test]
    fn test_throttling_and_server_errors_are_transient() {
        let entity = "orders/Subscriptions/audit";

        assert!(AzureError::from_status(StatusCode::TOO_MANY_REQUESTS, entity, "").is_transient());
        assert!(AzureError::from_status(StatusCode::SERVICE_UNAVAILABLE, entity, "").is_transient());
        assert!(!AzureError::from_status(StatusCode::BAD_REQUEST, entity, "").is_transient());
        assert!(!AzureError::from_status(StatusCode::NOT_FOUND, entity, "").is_transient());
    }

    #[test]
    fn test_invalid_broker_properties_are_serialization_errors() {
        let err = BrokerProperties::parse("{not json").unwrap_err();

        assert!(matches!(
            err.to_queue_error(),
            QueueError::SerializationError(SerializationError::InvalidBrokerProperty { .. })
        ));
    }

    #[test]
    fn test_broker_properties_populate_message() {
        let properties = BrokerProperties::parse(
            r#"{"MessageId":"m-1","SequenceNumber":42,"DeliveryCount":3,"EnqueuedTimeUtc":"Tue, 04 Mar 2025 10:15:00 GMT","LockToken":"lock-1"}"#,
        )
        .unwrap();

        let message = properties
            .into_message(bytes::Bytes::from_static(b"hello"))
            .unwrap();

        assert_eq!(message.message_id.as_str(), "m-1");
        assert_eq!(message.sequence_number, Some(42));
        assert_eq!(message.delivery_count, 3);
        assert_eq!(message.lock_token.as_deref(), Some("lock-1"));
        assert!(message.enqueued_at.is_some());
        assert_eq!(message.size(), 5);
    }
}

// ============================================================================
// Receive Tests
// ============================================================================

mod receive_tests {
    use super::*;

    /// The first request waits the full budget, follow-ups use the short wait
    #[tokio::test]
    async fn test_batch_assembled_from_sequential_requests() {
        // Arrange
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .and(query_param("timeout", "5"))
            .and(header_exists("Authorization"))
            .respond_with(message_response("m-1", 1))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .and(query_param("timeout", "1"))
            .respond_with(message_response("m-2", 2))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .and(query_param("timeout", "1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        // Act
        let batch = receiver
            .receive_batch(10, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        // Assert
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].message_id.as_str(), "m-1");
        assert_eq!(batch[1].sequence_number, Some(2));
        assert_eq!(batch[0].delivery_count, 2);
        assert_eq!(batch[0].body, "payload");
    }

    #[tokio::test]
    async fn test_batch_stops_at_max_messages() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(message_response("m", 1))
            .expect(2)
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        let batch = receiver
            .receive_batch(2, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
    }

    /// A steady trickle of messages cannot keep a batch open past its budget
    #[tokio::test]
    async fn test_batch_stops_once_the_wait_budget_has_elapsed() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(message_response("m", 1).set_delay(Duration::from_millis(400)))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;
        let started = std::time::Instant::now();

        let batch = receiver
            .receive_batch(1000, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!batch.is_empty());
        assert!(batch.len() <= 4, "batch of {} messages", batch.len());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_empty_entity_returns_empty_batch() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        let batch = receiver
            .receive_batch(10, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_dead_letter_receiver_uses_sub_queue_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(
                "/orders/Subscriptions/audit/$DeadLetterQueue/messages/head",
            ))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let receiver = open_receiver(
            &server,
            ReceiverOptions::receive_and_delete(SubQueue::DeadLetter),
        )
        .await;

        let batch = receiver
            .receive_batch(10, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert_eq!(
            receiver.entity_path(),
            "orders/Subscriptions/audit/$DeadLetterQueue"
        );
    }

    #[tokio::test]
    async fn test_peek_lock_uses_post_and_keeps_lock_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(MAIN_HEAD))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("BrokerProperties", r#"{"LockToken":"lock-1"}"#)
                    .set_body_string("x"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let options = ReceiverOptions {
            receive_mode: ReceiveMode::PeekLock,
            ..ReceiverOptions::default()
        };
        let receiver = open_receiver(&server, options).await;

        let batch = receiver
            .receive_batch(1, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch[0].lock_token.as_deref(), Some("lock-1"));
    }

    #[tokio::test]
    async fn test_failure_on_first_request_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        let result = receiver
            .receive_batch(10, Duration::from_secs(1), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(QueueError::AuthenticationFailed { .. })));
    }

    #[tokio::test]
    async fn test_missing_entity_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        let result = receiver
            .receive_batch(10, Duration::from_secs(1), &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(QueueError::EntityNotFound { ref entity_path })
                if entity_path == "orders/Subscriptions/audit"
        ));
    }

    /// Messages already deleted by the broker are not lost when a follow-up fails
    #[tokio::test]
    async fn test_failure_after_first_message_keeps_partial_batch() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .and(query_param("timeout", "5"))
            .respond_with(message_response("m-1", 1))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .and(query_param("timeout", "1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        let batch = receiver
            .receive_batch(10, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        let err = receiver
            .receive_batch(10, Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(matches!(err, QueueError::ProviderError { ref code, .. } if code == "503"));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_long_poll() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(MAIN_HEAD))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            receiver.receive_batch(10, Duration::from_secs(30), &cancel),
        )
        .await
        .expect("receive should return promptly after cancellation");

        assert!(matches!(result, Err(QueueError::Cancelled)));
    }
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_receiver_rejects_receives() {
        let server = MockServer::start().await;
        let receiver = open_receiver(&server, ReceiverOptions::default()).await;

        receiver.close().await.unwrap();
        receiver.close().await.unwrap();
        let result = receiver
            .receive_batch(10, Duration::from_secs(1), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(QueueError::ReceiverClosed { .. })));
    }

    #[tokio::test]
    async fn test_disposed_client_rejects_new_receivers() {
        let server = MockServer::start().await;
        let connector = AzureServiceBusConnector::new(emulator_config(&server)).unwrap();
        let client = connector.connect().await.unwrap();

        client.dispose().await.unwrap();
        client.dispose().await.unwrap();
        let result = client
            .open_receiver(
                &TopicName::new("orders").unwrap(),
                &SubscriptionName::new("audit").unwrap(),
                ReceiverOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(QueueError::ClientDisposed)));
    }
}
