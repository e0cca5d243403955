//! # Record Node
//!
//! Bootstrap for a record service process.
//!
//! ## Startup Sequence
//!
//! 1. Load telemetry and bus configuration from the environment
//! 2. Initialize structured logging
//! 3. Build the message bus; a provisioning failure aborts startup
//! 4. Attach diagnostic taps on `RECORD_TAP_SUBJECTS`, if any
//! 5. Run until Ctrl+C, then shut the bus down

mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};

use record_bus::{connect_bus, DeliveryError, MessageBus, MessageContext, MessageHandler};
use record_telemetry::{init_logging, TelemetryConfig};

use crate::config::NodeConfig;

/// Logs every delivery on a subject without interpreting it.
struct DiagnosticTap;

#[async_trait]
impl MessageHandler for DiagnosticTap {
    async fn received_message(
        &self,
        ctx: &MessageContext,
        payload: Bytes,
    ) -> Result<(), DeliveryError> {
        info!(
            subject = %ctx.subject,
            bytes = payload.len(),
            origin = ctx.identity.origin.as_deref().unwrap_or("-"),
            "Tapped message"
        );
        Ok(())
    }
}

async fn attach_taps(bus: &Arc<dyn MessageBus>, subjects: &[String]) -> Vec<String> {
    let tap: Arc<dyn MessageHandler> = Arc::new(DiagnosticTap);
    let mut attached = Vec::new();
    for subject in subjects {
        match bus.subscribe(subject, Arc::clone(&tap)).await {
            Ok(()) => attached.push(subject.clone()),
            Err(e) => warn!(subject = %subject, error = %e, "Failed to attach tap"),
        }
    }
    attached
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::for_service("record-node");
    init_logging(&telemetry).context("Failed to initialize logging")?;

    let config = NodeConfig::from_env().context("Invalid node configuration")?;
    info!(
        messaging_enabled = config.bus.messaging_enabled,
        url = %config.bus.url,
        stream = %config.bus.stream.name,
        "Starting record node"
    );

    let bus = match connect_bus(&config.bus).await {
        Ok(bus) => bus,
        Err(e) => {
            error!(error = %e, "Message bus unavailable, refusing to start");
            return Err(e).context("Failed to build message bus");
        }
    };

    let taps = attach_taps(&bus, &config.tap_subjects).await;
    info!(taps = ?taps, "Node is running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    info!("Initiating graceful shutdown...");
    bus.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
