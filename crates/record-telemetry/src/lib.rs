//! # Record Telemetry
//!
//! Structured logging setup shared by record service binaries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use record_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     init_logging(&config).expect("Failed to init logging");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RECORD_SERVICE_NAME` | `record-service` | Service name in log lines |
//! | `RECORD_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `RECORD_JSON_LOGS` | container detection | JSON formatted output |
//! | `RECORD_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Invalid log filter: {0}")]
    Filter(String),
}
