//! Bus for deployments without a broker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::MessageBus;
use crate::broker::OutboundMessage;
use crate::error::BusResult;
use crate::handler::MessageHandler;

/// Accepts every operation and delivers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBus;

impl NoopBus {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MessageBus for NoopBus {
    async fn publish_message(&self, message: OutboundMessage) -> BusResult<()> {
        trace!(subject = %message.subject, "No-op bus discarded message");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, _handler: Arc<dyn MessageHandler>) -> BusResult<()> {
        trace!(subject = %subject, "No-op bus ignored subscribe");
        Ok(())
    }

    async fn unsubscribe(&self, subject: &str) -> BusResult<()> {
        trace!(subject = %subject, "No-op bus ignored unsubscribe");
        Ok(())
    }

    async fn shutdown(&self) {
        trace!("No-op bus shut down");
    }
}
