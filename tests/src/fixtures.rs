//! # Test Fixtures
//!
//! Handlers that record what they receive, and bus builders over a shared
//! in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use record_bus::{
    BusConfig, DeliveryError, InMemoryBroker, MessageContext, MessageHandler, StreamBus,
    StreamConfig,
};

/// Subject used throughout the scenarios.
pub const TEST_SUBJECT: &str = "TEST-MESSAGE";

/// Single-field domain object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMessage {
    pub message: String,
}

impl TestMessage {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// What a [`RecordingHandler`] saw for one delivery.
#[derive(Debug, Clone)]
pub struct Received {
    pub subject: String,
    pub principal: String,
    pub origin: Option<String>,
    pub payload: Bytes,
}

/// Forwards every delivery to a channel.
pub struct RecordingHandler {
    sender: UnboundedSender<Received>,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn received_message(
        &self,
        ctx: &MessageContext,
        payload: Bytes,
    ) -> Result<(), DeliveryError> {
        let _ = self.sender.send(Received {
            subject: ctx.subject.clone(),
            principal: ctx.identity.principal.clone(),
            origin: ctx.identity.origin.clone(),
            payload,
        });
        Ok(())
    }
}

/// A recording handler and the receiving end of its channel.
pub fn recording_handler() -> (Arc<dyn MessageHandler>, UnboundedReceiver<Received>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(RecordingHandler { sender }), receiver)
}

/// Always fails.
pub struct RejectingHandler;

#[async_trait]
impl MessageHandler for RejectingHandler {
    async fn received_message(
        &self,
        _ctx: &MessageContext,
        _payload: Bytes,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected("referenced record does not exist".into()))
    }
}

/// Always panics.
pub struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn received_message(
        &self,
        _ctx: &MessageContext,
        _payload: Bytes,
    ) -> Result<(), DeliveryError> {
        panic!("handler bug")
    }
}

/// Broker-backed configuration for the `test` stream.
pub fn test_config(principal: &str, subjects: &[&str]) -> BusConfig {
    let mut config = BusConfig::with_stream(StreamConfig::new(
        "test",
        subjects.iter().map(|s| s.to_string()).collect(),
    ));
    config.principal = principal.to_string();
    config.durable_prefix = principal.to_string();
    config
}

/// Bus over a broker shared with other buses in the same test.
pub async fn bus_on(
    broker: &Arc<InMemoryBroker>,
    principal: &str,
    subjects: &[&str],
) -> StreamBus<InMemoryBroker> {
    StreamBus::with_shared_broker(Arc::clone(broker), &test_config(principal, subjects))
        .await
        .expect("bus construction")
}

/// Wait for the next delivery.
pub async fn next_received(receiver: &mut UnboundedReceiver<Received>) -> Received {
    timeout(Duration::from_millis(500), receiver.recv())
        .await
        .expect("timeout waiting for delivery")
        .expect("handler channel closed")
}

/// Assert nothing arrives within a short window.
pub async fn assert_silent(receiver: &mut UnboundedReceiver<Received>) {
    let result = timeout(Duration::from_millis(100), receiver.recv()).await;
    assert!(
        !matches!(result, Ok(Some(_))),
        "unexpected delivery: {:?}",
        result
    );
}

/// Give the dispatcher a chance to drain queued deliveries.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
