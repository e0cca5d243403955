//! # No-Op Bus
//!
//! Deployments with messaging disabled get a bus that accepts every call
//! and never invokes a handler.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use record_bus::{connect_bus, BusConfig, MessageBus, MessageBusExt, NoopBus, OutboundMessage};

    use crate::fixtures::{assert_silent, recording_handler, TestMessage, TEST_SUBJECT};

    #[tokio::test]
    async fn test_disabled_messaging_builds_noop_bus() {
        let config = BusConfig::from_lookup(|key| match key {
            "RECORD_MESSAGING_ENABLED" => Some("false".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(!config.messaging_enabled);

        let bus = connect_bus(&config).await.unwrap();
        let (handler, mut received) = recording_handler();

        bus.subscribe(TEST_SUBJECT, handler).await.unwrap();
        bus.publish(TEST_SUBJECT, &TestMessage::new("discarded"))
            .await
            .unwrap();
        assert_silent(&mut received).await;

        bus.unsubscribe(TEST_SUBJECT).await.unwrap();
        bus.unsubscribe(TEST_SUBJECT).await.unwrap();
    }

    #[tokio::test]
    async fn test_noop_bus_accepts_any_subject() {
        let bus: Arc<dyn MessageBus> = Arc::new(NoopBus::new());
        let (handler, mut received) = recording_handler();

        bus.subscribe("", Arc::clone(&handler)).await.unwrap();
        bus.subscribe("NOT.IN.ANY.STREAM", handler).await.unwrap();
        bus.publish_message(OutboundMessage::new("NOT.IN.ANY.STREAM", "raw"))
            .await
            .unwrap();
        assert_silent(&mut received).await;

        bus.unsubscribe("NEVER-SUBSCRIBED").await.unwrap();
    }
}
