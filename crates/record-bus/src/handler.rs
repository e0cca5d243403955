//! # Handler Contract
//!
//! Consumers implement [`MessageHandler`] to receive raw payloads. Each
//! invocation gets an explicit [`MessageContext`] carrying the identity the
//! handler runs under, instead of ambient thread-local state.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DeliveryError;

/// Message metadata, carried as broker headers.
pub type Metadata = BTreeMap<String, String>;

/// Header naming the principal that published a message.
pub const ORIGIN_HEADER: &str = "Record-Bus-Origin";

/// Who a handler acts as while processing a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Principal the handler's side effects are attributed to.
    pub principal: String,
    /// Principal that published the message, when the publisher stamped it.
    pub origin: Option<String>,
}

impl CallerIdentity {
    /// System identity of the consuming service.
    pub fn system(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            origin: None,
        }
    }

    /// Same identity, attributed to a publishing principal.
    #[must_use]
    pub fn with_origin(mut self, origin: Option<String>) -> Self {
        self.origin = origin;
        self
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} (on behalf of {})", self.principal, origin),
            None => write!(f, "{}", self.principal),
        }
    }
}

/// Context established for the duration of one handler invocation.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Identity the handler runs under.
    pub identity: CallerIdentity,
    /// Subject the message was delivered on.
    pub subject: String,
    /// Headers delivered with the message.
    pub metadata: Metadata,
    /// Local id correlating log lines for this delivery.
    pub delivery_id: Uuid,
}

impl MessageContext {
    pub fn new(identity: CallerIdentity, subject: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            identity,
            subject: subject.into(),
            metadata,
            delivery_id: Uuid::new_v4(),
        }
    }
}

/// Receives raw payloads delivered on a subscribed subject.
///
/// Handlers must tolerate an occasional extra delivery: a message may arrive
/// just after `unsubscribe` returns, and the broker may redeliver.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one delivered payload.
    ///
    /// Errors are logged by the dispatcher and never reach the broker.
    async fn received_message(
        &self,
        ctx: &MessageContext,
        payload: Bytes,
    ) -> Result<(), DeliveryError>;
}

/// Decode a JSON payload produced by [`MessageBusExt::publish`].
///
/// [`MessageBusExt::publish`]: crate::bus::MessageBusExt::publish
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DeliveryError> {
    Ok(serde_json::from_slice(payload)?)
}

/// Handler that decodes JSON payloads into `T` before calling a closure.
pub struct JsonHandler<T, F> {
    callback: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F, Fut> JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(MessageContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), DeliveryError>> + Send,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler for JsonHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(MessageContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), DeliveryError>> + Send,
{
    async fn received_message(
        &self,
        ctx: &MessageContext,
        payload: Bytes,
    ) -> Result<(), DeliveryError> {
        let message = decode::<T>(&payload)?;
        (self.callback)(ctx.clone(), message).await
    }
}
