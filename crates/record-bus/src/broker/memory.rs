//! # In-Memory Broker
//!
//! Single-process broker for tests and local development. Streams, routes
//! and the publish log live in memory; [`Faults`] simulate broker outages.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::{
    Acknowledge, Broker, Delivery, DeliverySink, OutboundMessage, StreamInfo, SubscriptionHandle,
};
use crate::config::StreamConfig;
use crate::error::BrokerError;
use crate::handler::Metadata;

/// Simulated broker failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// Stream creation fails with a connection error.
    pub provisioning_outage: bool,
    /// Stream creation returns without confirming the stream.
    pub unconfirmed_stream: bool,
    /// Subscribe fails with a connection error.
    pub subscribe_outage: bool,
    /// Subscribe returns without a handle.
    pub withhold_handle: bool,
    /// Publish fails.
    pub publish_outage: bool,
}

struct Route {
    handle_id: u64,
    subject: String,
    sink: DeliverySink,
    active: Arc<AtomicBool>,
}

struct CountingAck {
    acked: Arc<AtomicU64>,
}

#[async_trait]
impl Acknowledge for CountingAck {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// In-memory implementation of [`Broker`].
#[derive(Default)]
pub struct InMemoryBroker {
    streams: RwLock<Vec<StreamConfig>>,
    routes: RwLock<Vec<Route>>,
    published: Mutex<Vec<OutboundMessage>>,
    faults: Mutex<Faults>,
    acked: Arc<AtomicU64>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker that starts with the given faults.
    #[must_use]
    pub fn with_faults(faults: Faults) -> Self {
        let broker = Self::default();
        broker.set_faults(faults);
        broker
    }

    /// Replace the active faults.
    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock() = faults;
    }

    pub fn faults(&self) -> Faults {
        *self.faults.lock()
    }

    /// Every message accepted by `publish`, oldest first.
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().clone()
    }

    /// Streams created so far.
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.streams.read().iter().map(info_for).collect()
    }

    /// Live broker subscriptions on `subject`.
    pub fn route_count(&self, subject: &str) -> usize {
        self.routes
            .read()
            .iter()
            .filter(|r| r.subject == subject && r.active.load(Ordering::Acquire))
            .count()
    }

    /// Deliveries acknowledged by the dispatcher.
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    /// Push a message to every live subscription on `subject`, as the
    /// broker would on redelivery. Returns how many subscriptions got it.
    pub async fn deliver(&self, subject: &str, payload: impl Into<Bytes>) -> usize {
        self.route(subject, payload.into(), Metadata::new())
    }

    fn route(&self, subject: &str, payload: Bytes, metadata: Metadata) -> usize {
        let sinks: Vec<DeliverySink> = self
            .routes
            .read()
            .iter()
            .filter(|r| r.subject == subject && r.active.load(Ordering::Acquire))
            .map(|r| r.sink.clone())
            .collect();

        let mut delivered = 0;
        for sink in sinks {
            let delivery = Delivery::new(subject, payload.clone(), metadata.clone())
                .with_acker(Box::new(CountingAck {
                    acked: Arc::clone(&self.acked),
                }));
            match sink.try_send(delivery) {
                Ok(()) => delivered += 1,
                // Publishers may be handlers running on the dispatcher itself,
                // so a saturated queue is fed from a detached task.
                Err(TrySendError::Full(delivery)) => {
                    debug!(subject = %subject, "Dispatch queue full, deferring delivery");
                    tokio::spawn(async move {
                        if sink.send(delivery).await.is_err() {
                            debug!("Dispatcher closed before deferred delivery");
                        }
                    });
                    delivered += 1;
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    fn covered(&self, subject: &str) -> bool {
        self.streams.read().iter().any(|s| s.covers(subject))
    }
}

fn info_for(config: &StreamConfig) -> StreamInfo {
    StreamInfo {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<Option<StreamInfo>, BrokerError> {
        let faults = self.faults();
        if faults.provisioning_outage {
            return Err(BrokerError::Connection("broker unreachable".into()));
        }
        if faults.unconfirmed_stream {
            return Ok(None);
        }

        let mut streams = self.streams.write();
        if let Some(existing) = streams.iter().find(|s| s.name == config.name) {
            return Ok(Some(info_for(existing)));
        }
        streams.push(config.clone());
        debug!(stream = %config.name, "In-memory stream created");
        Ok(Some(info_for(config)))
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        if self.faults().publish_outage {
            return Err(BrokerError::Publish {
                subject: message.subject,
                reason: "broker unreachable".into(),
            });
        }
        if !self.covered(&message.subject) {
            return Err(BrokerError::NoStream(message.subject));
        }

        self.published.lock().push(message.clone());
        let OutboundMessage {
            subject,
            payload,
            metadata,
        } = message;
        self.route(&subject, payload, metadata);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        durable_name: &str,
        sink: DeliverySink,
    ) -> Result<Option<SubscriptionHandle>, BrokerError> {
        let faults = self.faults();
        if faults.subscribe_outage {
            return Err(BrokerError::Connection("broker unreachable".into()));
        }
        if faults.withhold_handle {
            return Ok(None);
        }
        if !self.covered(subject) {
            return Err(BrokerError::NoStream(subject.to_string()));
        }

        let handle = SubscriptionHandle::new(subject, durable_name);
        self.routes.write().push(Route {
            handle_id: handle.id(),
            subject: subject.to_string(),
            sink,
            active: handle.active_flag(),
        });
        Ok(Some(handle))
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError> {
        if !handle.release() {
            return Ok(());
        }
        self.routes.write().retain(|r| r.handle_id != handle.id());
        Ok(())
    }
}
