//! # Bus Errors
//!
//! Broker-level failures (`BrokerError`) are kept apart from handler-level
//! failures (`DeliveryError`). The facade maps broker failures into the
//! `BusError` taxonomy depending on which operation hit them.

use thiserror::Error;

/// Errors raised by a concrete broker connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker could not be reached or the connection dropped.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// The broker answered with something the adapter did not expect.
    #[error("broker protocol error: {0}")]
    Protocol(String),

    /// The broker refused or failed to store a published message.
    #[error("broker publish failed on {subject}: {reason}")]
    Publish { subject: String, reason: String },

    /// No provisioned stream captures the subject.
    #[error("no stream covers subject {0}")]
    NoStream(String),

    /// The shared dispatcher is gone; nothing can be delivered.
    #[error("dispatcher closed")]
    DispatcherClosed,
}

/// Errors surfaced by the bus facade.
#[derive(Debug, Error)]
pub enum BusError {
    /// The durable stream could not be created or confirmed at startup.
    ///
    /// Fatal: the bus is never constructed.
    #[error("stream provisioning failed for {stream}: {reason}")]
    Provisioning { stream: String, reason: String },

    /// A subscribe/unsubscribe call could not be satisfied by the broker.
    #[error("bus cannot service subject {subject}: {reason}")]
    Internal { subject: String, reason: String },

    /// The caller's message could not be serialized for publishing.
    #[error("message for {subject} is not acceptable: {reason}")]
    NotAcceptable { subject: String, reason: String },

    /// The subject is empty or contains characters the bus does not route.
    #[error("invalid subject {0:?}")]
    InvalidSubject(String),

    /// The subject is not covered by the provisioned stream.
    #[error("subject {subject} is not covered by stream {stream}")]
    UncoveredSubject { subject: String, stream: String },

    /// A publish failure reported by the broker, passed through unchanged.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BusError {
    pub(crate) fn internal(subject: &str, reason: impl ToString) -> Self {
        BusError::Internal {
            subject: subject.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the bus must not be used at all.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Provisioning { .. })
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Failure reported by (or caught around) a message handler.
///
/// Always logged by the dispatcher, never propagated to the broker.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The payload could not be decoded into the handler's type.
    #[error("payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// The handler refused the message.
    #[error("handler rejected message: {0}")]
    Rejected(String),

    /// The handler panicked while processing the message.
    #[error("handler panicked: {0}")]
    Panicked(String),
}
