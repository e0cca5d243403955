//! # Failure Isolation
//!
//! Provisioning failures are fatal, subscribe/publish failures reach the
//! caller, and handler failures stay inside the dispatcher.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde::ser::{Error as _, Serializer};
    use serde::Serialize;

    use record_bus::broker::memory::Faults;
    use record_bus::broker::{DeliverySink, StreamInfo, SubscriptionHandle};
    use record_bus::{
        connect_bus, Broker, BrokerError, BusConfig, BusError, DeliveryError, InMemoryBroker,
        MessageBus, MessageBusExt, MessageContext, MessageHandler, OutboundMessage, StreamBus,
        StreamConfig,
    };

    use crate::fixtures::{
        assert_silent, bus_on, next_received, recording_handler, settle, test_config,
        PanickingHandler, RejectingHandler, TestMessage, TEST_SUBJECT,
    };

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("unsupported field"))
        }
    }

    /// Broker whose unsubscribe leaves the underlying route live, so
    /// messages can still arrive after the bus dropped the subscription.
    struct LingeringBroker {
        inner: Arc<InMemoryBroker>,
    }

    #[async_trait]
    impl Broker for LingeringBroker {
        async fn ensure_stream(
            &self,
            config: &StreamConfig,
        ) -> Result<Option<StreamInfo>, BrokerError> {
            self.inner.ensure_stream(config).await
        }

        async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
            self.inner.publish(message).await
        }

        async fn subscribe(
            &self,
            subject: &str,
            durable_name: &str,
            sink: DeliverySink,
        ) -> Result<Option<SubscriptionHandle>, BrokerError> {
            self.inner.subscribe(subject, durable_name, sink).await
        }

        async fn unsubscribe(&self, _handle: &SubscriptionHandle) -> Result<(), BrokerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_provisioning_failure_is_fatal() {
        let config = test_config("record-service", &[TEST_SUBJECT]);

        let outage = InMemoryBroker::with_faults(Faults {
            provisioning_outage: true,
            ..Faults::default()
        });
        let err = StreamBus::new(outage, &config).await.err().unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, BusError::Provisioning { ref stream, .. } if stream == "test"));

        let unconfirmed = InMemoryBroker::with_faults(Faults {
            unconfirmed_stream: true,
            ..Faults::default()
        });
        let err = StreamBus::new(unconfirmed, &config).await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_broker_yields_no_bus() {
        let mut config = test_config("record-service", &[TEST_SUBJECT]);
        config.url = "nats://127.0.0.1:1".to_string();
        config.connect_timeout = Duration::from_millis(500);

        let result = tokio::time::timeout(Duration::from_secs(5), connect_bus(&config))
            .await
            .expect("connect attempt outlived its connect timeout");
        assert!(matches!(
            result,
            Err(BusError::Provisioning { ref stream, .. }) if stream == "test"
        ));
    }

    #[tokio::test]
    async fn test_not_acceptable_leaves_subscriptions_untouched() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus = bus_on(&broker, "record-service", &[TEST_SUBJECT]).await;
        let (handler, mut received) = recording_handler();
        bus.subscribe(TEST_SUBJECT, handler).await.unwrap();

        let err = bus.publish(TEST_SUBJECT, &Unserializable).await.unwrap_err();
        assert!(matches!(err, BusError::NotAcceptable { .. }));
        assert!(!err.is_fatal());
        assert!(broker.published().is_empty());
        assert!(bus.is_subscribed(TEST_SUBJECT));
        assert_silent(&mut received).await;

        bus.publish(TEST_SUBJECT, &TestMessage::new("valid")).await.unwrap();
        next_received(&mut received).await;
    }

    #[tokio::test]
    async fn test_failing_handlers_do_not_block_other_subjects() {
        let subjects = ["BROKEN", "REJECTED", TEST_SUBJECT];
        let broker = Arc::new(InMemoryBroker::new());
        let bus = bus_on(&broker, "record-service", &subjects).await;

        let (handler, mut received) = recording_handler();
        bus.subscribe("BROKEN", Arc::new(PanickingHandler)).await.unwrap();
        bus.subscribe("REJECTED", Arc::new(RejectingHandler)).await.unwrap();
        bus.subscribe(TEST_SUBJECT, handler).await.unwrap();

        for round in 0..2 {
            let message = TestMessage::new(&format!("round {round}"));
            bus.publish("BROKEN", &message).await.unwrap();
            bus.publish("REJECTED", &message).await.unwrap();
            bus.publish(TEST_SUBJECT, &message).await.unwrap();

            let delivery = next_received(&mut received).await;
            let decoded: TestMessage = record_bus::decode(&delivery.payload).unwrap();
            assert_eq!(decoded, message);
        }
        settle().await;

        let stats = bus.stats();
        assert_eq!(stats.published, 6);
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.handler_failures, 4);
        assert_eq!(broker.acked(), 6);
        assert!(bus.is_subscribed("BROKEN"));
    }

    /// Publishes follow-up events from inside the dispatcher, the way a
    /// classification consumer emits audit events.
    struct FollowUpPublisher {
        bus: Arc<StreamBus<InMemoryBroker>>,
        follow_ups: usize,
    }

    #[async_trait]
    impl MessageHandler for FollowUpPublisher {
        async fn received_message(
            &self,
            _ctx: &MessageContext,
            _payload: Bytes,
        ) -> Result<(), DeliveryError> {
            for i in 0..self.follow_ups {
                self.bus
                    .publish("AUDIT", &TestMessage::new(&format!("follow-up {i}")))
                    .await
                    .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_can_publish_through_a_full_dispatch_queue() {
        let broker = Arc::new(InMemoryBroker::new());
        let mut config = test_config("record-service", &["CLASSIFY", "AUDIT"]);
        config.dispatch_capacity = 1;
        let bus = Arc::new(
            StreamBus::with_shared_broker(Arc::clone(&broker), &config)
                .await
                .unwrap(),
        );

        let (audit, mut received) = recording_handler();
        bus.subscribe("AUDIT", audit).await.unwrap();
        let follow_ups = Arc::new(FollowUpPublisher {
            bus: Arc::clone(&bus),
            follow_ups: 3,
        });
        bus.subscribe("CLASSIFY", follow_ups).await.unwrap();

        bus.publish("CLASSIFY", &TestMessage::new("classify"))
            .await
            .unwrap();
        for _ in 0..3 {
            next_received(&mut received).await;
        }

        tokio::time::timeout(
            Duration::from_secs(1),
            bus.publish("AUDIT", &TestMessage::new("external")),
        )
        .await
        .expect("publish stalled behind the dispatcher")
        .unwrap();
        next_received(&mut received).await;

        settle().await;
        assert_eq!(bus.stats().handler_failures, 0);
        bus.shutdown().await;
    }

    #[tokio::test]
    async fn test_late_delivery_after_unsubscribe_is_dropped() {
        let inner = Arc::new(InMemoryBroker::new());
        let broker = LingeringBroker {
            inner: Arc::clone(&inner),
        };
        let bus = StreamBus::new(broker, &test_config("record-service", &[TEST_SUBJECT]))
            .await
            .unwrap();

        let (handler, mut received) = recording_handler();
        bus.subscribe(TEST_SUBJECT, handler).await.unwrap();
        bus.unsubscribe(TEST_SUBJECT).await.unwrap();

        assert_eq!(inner.deliver(TEST_SUBJECT, "in flight").await, 1);
        assert_silent(&mut received).await;

        let stats = bus.stats();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.delivered, 0);
        assert_eq!(inner.acked(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_previous_subscription() {
        let broker = Arc::new(InMemoryBroker::new());
        let bus = bus_on(&broker, "record-service", &[TEST_SUBJECT]).await;
        let (handler, mut received) = recording_handler();
        bus.subscribe(TEST_SUBJECT, Arc::clone(&handler)).await.unwrap();

        broker.set_faults(Faults {
            subscribe_outage: true,
            ..Faults::default()
        });
        let err = bus.subscribe(TEST_SUBJECT, handler).await.unwrap_err();
        assert!(matches!(err, BusError::Internal { ref subject, .. } if subject == TEST_SUBJECT));
        broker.set_faults(Faults::default());

        broker.deliver(TEST_SUBJECT, "still here").await;
        assert_eq!(
            next_received(&mut received).await.payload.as_ref(),
            b"still here"
        );
    }

    #[tokio::test]
    async fn test_disabled_config_never_touches_broker() {
        let config = BusConfig {
            url: "nats://127.0.0.1:1".to_string(),
            ..BusConfig::default()
        };
        let bus = connect_bus(&config).await.unwrap();
        bus.publish(TEST_SUBJECT, &TestMessage::new("ignored"))
            .await
            .unwrap();
    }
}
