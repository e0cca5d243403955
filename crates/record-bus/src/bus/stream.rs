//! Broker-backed bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::MessageBus;
use crate::broker::{Broker, JetStreamBroker, OutboundMessage, StreamInfo};
use crate::config::{BusConfig, StreamConfig};
use crate::dispatcher::{BusStats, DispatchGroup, Dispatcher, StatsSnapshot};
use crate::error::{BusError, BusResult};
use crate::handler::{CallerIdentity, MessageHandler, ORIGIN_HEADER};
use crate::provisioner::StreamProvisioner;
use crate::registry::SubscriptionRegistry;
use crate::subject::{durable_name, validate_subject};

/// Message bus over a durable-stream [`Broker`].
///
/// Owns the shared broker connection, the subscription registry and the
/// single dispatch task serving every subject.
pub struct StreamBus<B: Broker> {
    broker: Arc<B>,
    registry: Arc<SubscriptionRegistry>,
    dispatch: DispatchGroup,
    stats: Arc<BusStats>,
    stream: StreamInfo,
    stream_config: StreamConfig,
    durable_prefix: String,
    principal: String,
    closed: AtomicBool,
}

impl StreamBus<JetStreamBroker> {
    /// Connect to NATS and build the bus. Connection failures are fatal.
    pub async fn connect(config: &BusConfig) -> BusResult<Self> {
        let broker = JetStreamBroker::connect(config)
            .await
            .map_err(|e| BusError::Provisioning {
                stream: config.stream.name.clone(),
                reason: e.to_string(),
            })?;
        Self::new(broker, config).await
    }
}

impl<B: Broker> StreamBus<B> {
    /// Provision the stream and start dispatching.
    ///
    /// Fails with [`BusError::Provisioning`] when the stream cannot be
    /// created or confirmed; no bus exists in that case.
    pub async fn new(broker: B, config: &BusConfig) -> BusResult<Self> {
        Self::with_shared_broker(Arc::new(broker), config).await
    }

    /// Same as [`StreamBus::new`] for a broker the caller keeps a handle to.
    pub async fn with_shared_broker(broker: Arc<B>, config: &BusConfig) -> BusResult<Self> {
        let stream = StreamProvisioner::new(broker.as_ref())
            .provision(&config.stream)
            .await?;

        let registry = Arc::new(SubscriptionRegistry::new());
        let stats = Arc::new(BusStats::default());
        let dispatch = Dispatcher::new(
            Arc::clone(&registry),
            CallerIdentity::system(config.principal.clone()),
            Arc::clone(&stats),
        )
        .spawn(config.dispatch_capacity);

        info!(
            stream = %stream.name,
            principal = %config.principal,
            "Message bus ready"
        );

        Ok(Self {
            broker,
            registry,
            dispatch,
            stats,
            stream,
            stream_config: config.stream.clone(),
            durable_prefix: config.durable_prefix.clone(),
            principal: config.principal.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Stream confirmed during provisioning.
    pub fn stream(&self) -> &StreamInfo {
        &self.stream
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_subscribed(&self, subject: &str) -> bool {
        self.registry.is_active(subject)
    }

    /// Subjects with an active subscription.
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.active_subjects()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn check_subject(&self, subject: &str) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::internal(subject, "message bus is shut down"));
        }
        validate_subject(subject)?;
        if !self.stream_config.covers(subject) {
            return Err(BusError::UncoveredSubject {
                subject: subject.to_string(),
                stream: self.stream.name.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<B: Broker> MessageBus for StreamBus<B> {
    async fn publish_message(&self, message: OutboundMessage) -> BusResult<()> {
        self.check_subject(&message.subject)?;

        let message = message.with_metadata(ORIGIN_HEADER, self.principal.as_str());
        let subject = message.subject.clone();
        let size = message.payload.len();

        self.broker.publish(message).await?;
        self.stats.record_published();

        debug!(subject = %subject, bytes = size, "Message published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>) -> BusResult<()> {
        self.check_subject(subject)?;

        let durable = durable_name(&self.durable_prefix, subject);
        let handle = self
            .broker
            .subscribe(subject, &durable, self.dispatch.sink())
            .await
            .map_err(|e| BusError::internal(subject, e))?
            .ok_or_else(|| BusError::internal(subject, "broker returned no subscription handle"))?;

        if let Some(previous) = self.registry.register(subject, handler, handle) {
            debug!(subject = %subject, "Replacing existing subscription");
            if let Err(e) = self.broker.detach(&previous).await {
                warn!(
                    subject = %subject,
                    error = %e,
                    "Failed to release replaced subscription"
                );
            }
        }

        if self.is_closed() {
            if let Some(handle) = self.registry.deactivate(subject) {
                let _ = self.broker.detach(&handle).await;
            }
            return Err(BusError::internal(subject, "message bus is shut down"));
        }

        info!(subject = %subject, durable = %durable, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, subject: &str) -> BusResult<()> {
        let Some(handle) = self.registry.deactivate(subject) else {
            debug!(subject = %subject, "Unsubscribe on inactive subject ignored");
            return Ok(());
        };

        self.broker
            .unsubscribe(&handle)
            .await
            .map_err(|e| BusError::internal(subject, e))?;

        info!(subject = %subject, "Unsubscribed");
        Ok(())
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in self.registry.drain() {
            if let Err(e) = self.broker.detach(&handle).await {
                warn!(subject = %handle.subject(), error = %e, "Failed to release subscription");
            }
        }
        self.dispatch.stop();
        info!(stream = %self.stream.name, "Message bus shut down");
    }
}
