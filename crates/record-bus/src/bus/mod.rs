//! # Bus Facade
//!
//! [`MessageBus`] is the capability every consumer depends on. The variant
//! is chosen once at bootstrap by [`connect_bus`]:
//!
//! - [`StreamBus`]: broker-backed, provisions its stream on construction
//! - [`NoopBus`]: accepts everything, delivers nothing

mod noop;
mod stream;

pub use noop::NoopBus;
pub use stream::StreamBus;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::broker::OutboundMessage;
use crate::config::BusConfig;
use crate::error::{BusError, BusResult};
use crate::handler::MessageHandler;

/// Publish/subscribe capability shared by both bus variants.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an already serialized message.
    async fn publish_message(&self, message: OutboundMessage) -> BusResult<()>;

    /// Register `handler` for `subject`, replacing any earlier registration.
    async fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>) -> BusResult<()>;

    /// Stop delivering `subject`. Unknown or inactive subjects are a no-op.
    async fn unsubscribe(&self, subject: &str) -> BusResult<()>;

    /// Release every subscription and stop dispatching. Later publish and
    /// subscribe calls fail. Calling it again is a no-op.
    async fn shutdown(&self);
}

/// Typed publishing over any [`MessageBus`].
#[async_trait]
pub trait MessageBusExt: MessageBus {
    /// Serialize `message` as JSON and publish it on `subject`.
    ///
    /// Serialization failures are reported as [`BusError::NotAcceptable`].
    async fn publish<T>(&self, subject: &str, message: &T) -> BusResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let payload = encode(subject, message)?;
        self.publish_message(OutboundMessage::new(subject, payload))
            .await
    }
}

impl<B: MessageBus + ?Sized> MessageBusExt for B {}

/// Serialize a domain object for publishing.
pub fn encode<T>(subject: &str, message: &T) -> BusResult<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(message).map_err(|e| BusError::NotAcceptable {
        subject: subject.to_string(),
        reason: e.to_string(),
    })
}

/// Build the bus variant selected by `config.messaging_enabled`.
///
/// A broker-backed bus that cannot connect or provision its stream is a
/// fatal [`BusError::Provisioning`].
pub async fn connect_bus(config: &BusConfig) -> BusResult<Arc<dyn MessageBus>> {
    if !config.messaging_enabled {
        info!("Messaging disabled, using no-op bus");
        return Ok(Arc::new(NoopBus::new()));
    }

    let bus = StreamBus::connect(config).await?;
    Ok(Arc::new(bus))
}
