//! # Dispatcher
//!
//! One dispatch task per bus consumes deliveries from every subscription and
//! invokes the registered handler inside an identity span. Handler errors and
//! panics stop here; they never reach the broker pumps feeding this task.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::broker::{Delivery, DeliverySink};
use crate::error::DeliveryError;
use crate::handler::{CallerIdentity, MessageContext, ORIGIN_HEADER};
use crate::registry::SubscriptionRegistry;

/// Counters shared by a bus and its dispatcher.
#[derive(Debug, Default)]
pub struct BusStats {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`BusStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub handler_failures: u64,
    pub dropped: u64,
}

impl BusStats {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran and returned `Ok`.
    Delivered,
    /// The handler returned an error or panicked.
    HandlerFailed,
    /// No active subscription; the message was acknowledged and dropped.
    Dropped,
}

/// Routes deliveries to registered handlers.
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    identity: CallerIdentity,
    stats: Arc<BusStats>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        identity: CallerIdentity,
        stats: Arc<BusStats>,
    ) -> Self {
        Self {
            registry,
            identity,
            stats,
        }
    }

    /// Start the shared dispatch task.
    pub fn spawn(self, capacity: usize) -> DispatchGroup {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(self.run(receiver));
        DispatchGroup {
            sink: DeliverySink::new(sender),
            task,
        }
    }

    async fn run(self, mut receiver: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = receiver.recv().await {
            self.dispatch(delivery).await;
        }
        debug!("Dispatcher stopped, all delivery sinks closed");
    }

    /// Deliver one message to its subject's handler.
    pub async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        let Some(handler) = self.registry.lookup(&delivery.subject) else {
            debug!(subject = %delivery.subject, "No active subscription, dropping message");
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            acknowledge(&delivery).await;
            return DispatchOutcome::Dropped;
        };

        let origin = delivery.metadata.get(ORIGIN_HEADER).cloned();
        let ctx = MessageContext::new(
            self.identity.clone().with_origin(origin),
            delivery.subject.clone(),
            delivery.metadata.clone(),
        );
        let span = info_span!(
            "bus.dispatch",
            subject = %ctx.subject,
            principal = %ctx.identity.principal,
            origin = ctx.identity.origin.as_deref().unwrap_or("-"),
            delivery_id = %ctx.delivery_id
        );

        let result = AssertUnwindSafe(handler.received_message(&ctx, delivery.payload.clone()))
            .catch_unwind()
            .instrument(span)
            .await;

        let outcome = match result {
            Ok(Ok(())) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Delivered
            }
            Ok(Err(e)) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subject = %ctx.subject,
                    delivery_id = %ctx.delivery_id,
                    error = %e,
                    "Handler failed to process message"
                );
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                let e = DeliveryError::Panicked(panic_message(panic.as_ref()));
                error!(
                    subject = %ctx.subject,
                    delivery_id = %ctx.delivery_id,
                    error = %e,
                    "Handler panicked while processing message"
                );
                DispatchOutcome::HandlerFailed
            }
        };

        acknowledge(&delivery).await;
        outcome
    }
}

async fn acknowledge(delivery: &Delivery) {
    if let Err(e) = delivery.ack().await {
        warn!(subject = %delivery.subject, error = %e, "Failed to acknowledge delivery");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Running dispatch task and the sink that feeds it.
///
/// Dropping the group stops the task.
pub struct DispatchGroup {
    sink: DeliverySink,
    task: JoinHandle<()>,
}

impl DispatchGroup {
    /// Sink handed to broker subscriptions.
    pub fn sink(&self) -> DeliverySink {
        self.sink.clone()
    }

    /// Stop dispatching. Deliveries still queued are discarded unacknowledged.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for DispatchGroup {
    fn drop(&mut self) {
        self.task.abort();
    }
}
