//! # Record Bus - Durable Message Bus for Record Services
//!
//! Decouples producers (classification requests, ADR and audit events,
//! cross-service notifications) from their consumers.
//!
//! ```text
//!  producer ──publish()──▶ ┌───────────┐        ┌──────────────┐
//!                          │ StreamBus │──────▶ │ JetStream    │
//!                          └───────────┘        │ (stream)     │
//!                               ▲               └──────┬───────┘
//!                  subscribe()  │                      │ durable push
//!                               │               ┌──────▼───────┐
//!  consumer ◀── handler ◀───────┴────────────── │  Dispatcher  │
//!                                               └──────────────┘
//! ```
//!
//! ## Components
//!
//! - [`handler`]: the contract consumers implement
//! - [`registry`]: subject → subscription state
//! - [`provisioner`]: creates the durable stream before any traffic
//! - [`broker`]: JetStream and in-memory broker adapters
//! - [`dispatcher`]: the single task invoking handlers
//! - [`bus`]: the facade, broker-backed or no-op
//!
//! ## Failure Isolation
//!
//! - Provisioning failures are fatal: no bus is built
//! - Subscribe/unsubscribe failures are reported to the caller
//! - Handler errors and panics are logged by the dispatcher and go no further

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod broker;
pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod provisioner;
pub mod registry;
pub mod subject;

// Re-export main types
pub use broker::{Broker, InMemoryBroker, JetStreamBroker, OutboundMessage};
pub use bus::{connect_bus, MessageBus, MessageBusExt, NoopBus, StreamBus};
pub use config::{BusConfig, StreamConfig};
pub use dispatcher::{DispatchOutcome, StatsSnapshot};
pub use error::{BrokerError, BusError, BusResult, DeliveryError};
pub use handler::{decode, CallerIdentity, JsonHandler, MessageContext, MessageHandler, Metadata};
