//! # Stream Provisioner
//!
//! Runs once while a broker-backed bus is being built. Any failure here is
//! fatal for the bus; retrying is the process supervisor's job.

use tracing::{error, info};

use crate::broker::{Broker, StreamInfo};
use crate::config::StreamConfig;
use crate::error::{BusError, BusResult};

/// Ensures the durable stream exists before any traffic flows.
pub struct StreamProvisioner<'a, B: Broker + ?Sized> {
    broker: &'a B,
}

impl<'a, B: Broker + ?Sized> StreamProvisioner<'a, B> {
    pub fn new(broker: &'a B) -> Self {
        Self { broker }
    }

    /// Create or confirm the stream described by `config`.
    pub async fn provision(&self, config: &StreamConfig) -> BusResult<StreamInfo> {
        let fail = |reason: String| {
            error!(stream = %config.name, reason = %reason, "Stream provisioning failed");
            BusError::Provisioning {
                stream: config.name.clone(),
                reason,
            }
        };

        if config.name.trim().is_empty() {
            return Err(fail("stream name is empty".into()));
        }
        if config.subjects.is_empty() {
            return Err(fail("stream declares no subjects".into()));
        }

        match self.broker.ensure_stream(config).await {
            Ok(Some(info)) => {
                info!(
                    stream = %info.name,
                    subjects = ?info.subjects,
                    "Stream provisioned"
                );
                Ok(info)
            }
            Ok(None) => Err(fail("broker did not confirm the stream".into())),
            Err(e) => Err(fail(e.to_string())),
        }
    }
}
