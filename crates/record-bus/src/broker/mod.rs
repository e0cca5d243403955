//! # Broker Adapter
//!
//! [`Broker`] is the only seam that talks to a concrete durable-stream
//! broker. Deliveries from every subscription are pushed into one shared
//! [`DeliverySink`] owned by the dispatcher.

pub mod jetstream;
pub mod memory;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::AbortHandle;

use crate::config::StreamConfig;
use crate::error::BrokerError;
use crate::handler::Metadata;

pub use jetstream::JetStreamBroker;
pub use memory::InMemoryBroker;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Stream confirmation returned by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Confirmed stream name.
    pub name: String,
    /// Subject patterns the broker reports for the stream.
    pub subjects: Vec<String>,
}

/// A serialized message on its way to the broker.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub subject: String,
    pub payload: Bytes,
    pub metadata: Metadata,
}

impl OutboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Acknowledges a delivery back to the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// A message pushed by the broker for a subscribed subject.
pub struct Delivery {
    pub subject: String,
    pub payload: Bytes,
    pub metadata: Metadata,
    acker: Option<Box<dyn Acknowledge>>,
}

impl Delivery {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>, metadata: Metadata) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            metadata,
            acker: None,
        }
    }

    #[must_use]
    pub fn with_acker(mut self, acker: Box<dyn Acknowledge>) -> Self {
        self.acker = Some(acker);
        self
    }

    /// Acknowledge the delivery, if the broker expects it.
    pub async fn ack(&self) -> Result<(), BrokerError> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("metadata", &self.metadata)
            .field("acked", &self.acker.is_some())
            .finish()
    }
}

/// Entry point into the shared dispatcher.
#[derive(Debug, Clone)]
pub struct DeliverySink {
    sender: mpsc::Sender<Delivery>,
}

impl DeliverySink {
    pub(crate) fn new(sender: mpsc::Sender<Delivery>) -> Self {
        Self { sender }
    }

    /// Queue a delivery, waiting while the dispatcher is saturated.
    pub async fn send(&self, delivery: Delivery) -> Result<(), BrokerError> {
        self.sender
            .send(delivery)
            .await
            .map_err(|_| BrokerError::DispatcherClosed)
    }

    /// Queue a delivery without waiting. A full queue hands it back.
    pub fn try_send(&self, delivery: Delivery) -> Result<(), TrySendError<Delivery>> {
        self.sender.try_send(delivery)
    }

    /// Whether the dispatcher has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Broker-side subscription owned by the registry.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    subject: String,
    durable_name: String,
    active: Arc<AtomicBool>,
    pump: Option<AbortHandle>,
}

impl SubscriptionHandle {
    pub fn new(subject: impl Into<String>, durable_name: impl Into<String>) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            subject: subject.into(),
            durable_name: durable_name.into(),
            active: Arc::new(AtomicBool::new(true)),
            pump: None,
        }
    }

    /// Attach the task that forwards broker pushes into the dispatcher.
    #[must_use]
    pub fn with_pump(mut self, pump: AbortHandle) -> Self {
        self.pump = Some(pump);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn durable_name(&self) -> &str {
        &self.durable_name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Shared flag pumps check before forwarding.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }

    /// Mark the handle released and stop its pump.
    ///
    /// Returns `false` when the handle was already released.
    pub fn release(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(pump) = &self.pump {
            pump.abort();
        }
        true
    }
}

/// A durable-stream broker connection.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Create the stream or confirm it exists.
    ///
    /// `Ok(None)` means the broker answered without confirming the stream.
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<Option<StreamInfo>, BrokerError>;

    /// Publish one message, waiting for the broker to accept it.
    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError>;

    /// Open a durable push subscription whose deliveries go to `sink`.
    ///
    /// `Ok(None)` means the broker answered without producing a subscription.
    async fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
        sink: DeliverySink,
    ) -> Result<Option<SubscriptionHandle>, BrokerError>;

    /// Release a subscription and discard its durable consumer state.
    ///
    /// Already released handles are a no-op.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError>;

    /// Stop local delivery for a subscription but keep its durable consumer,
    /// so a later subscription under the same durable name resumes from it.
    ///
    /// Used when a subscription is replaced and on shutdown. Brokers without
    /// durable consumer state release the subscription.
    async fn detach(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError> {
        self.unsubscribe(handle).await
    }
}
