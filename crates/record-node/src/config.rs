//! Node configuration from environment variables.

use std::env;

use record_bus::{BusConfig, BusResult};

/// Everything the node needs at startup besides logging.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Message bus settings (`RECORD_*` bus variables).
    pub bus: BusConfig,

    /// Subjects to attach a diagnostic tap to (`RECORD_TAP_SUBJECTS`).
    pub tap_subjects: Vec<String>,
}

impl NodeConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> BusResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> BusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            bus: BusConfig::from_lookup(&lookup)?,
            tap_subjects: lookup("RECORD_TAP_SUBJECTS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }
}
