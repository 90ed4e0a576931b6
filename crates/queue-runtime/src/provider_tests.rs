//! Tests for provider types and receiver options.

use super::*;

#[test]
fn test_entity_path_for_main_queue() {
    let topic = TopicName::new("orders").unwrap();
    let subscription = SubscriptionName::new("audit").unwrap();

    assert_eq!(
        entity_path(&topic, &subscription, SubQueue::Main),
        "orders/Subscriptions/audit"
    );
}

#[test]
fn test_entity_path_for_dead_letter_queue() {
    let topic = TopicName::new("region/eu/orders").unwrap();
    let subscription = SubscriptionName::new("audit").unwrap();

    assert_eq!(
        entity_path(&topic, &subscription, SubQueue::DeadLetter),
        "region/eu/orders/Subscriptions/audit/$DeadLetterQueue"
    );
}

#[test]
fn test_receiver_options_defaults() {
    let options = ReceiverOptions::default();

    assert_eq!(options.receive_mode, ReceiveMode::ReceiveAndDelete);
    assert_eq!(options.sub_queue, SubQueue::Main);
    assert_eq!(options.prefetch_count, None);
}

#[test]
fn test_receiver_options_builder() {
    let options =
        ReceiverOptions::receive_and_delete(SubQueue::DeadLetter).with_prefetch_count(Some(250));

    assert_eq!(options.sub_queue, SubQueue::DeadLetter);
    assert_eq!(options.prefetch_count, Some(250));
}

#[test]
fn test_azure_config_defaults() {
    let config = AzureServiceBusConfig::new("Endpoint=sb://example.servicebus.windows.net/");

    assert_eq!(config.request_timeout, Duration::from_secs(30));
    assert_eq!(config.token_ttl, Duration::from_secs(3600));
}

#[test]
fn test_sub_queue_display() {
    assert_eq!(SubQueue::Main.to_string(), "Main");
    assert_eq!(SubQueue::DeadLetter.to_string(), "DeadLetter");
    assert_eq!(ProviderType::AzureServiceBus.to_string(), "AzureServiceBus");
}
