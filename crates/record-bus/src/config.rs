//! # Bus Configuration
//!
//! Resolved once at process bootstrap and never re-read.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RECORD_MESSAGING_ENABLED` | `false` | Broker-backed bus when true, no-op bus otherwise |
//! | `RECORD_NATS_URL` | `nats://localhost:4222` | Broker address |
//! | `RECORD_NATS_USER` / `RECORD_NATS_PASSWORD` | unset | User credentials |
//! | `RECORD_NATS_TOKEN` | unset | Token credentials (used when no user is set) |
//! | `RECORD_STREAM_NAME` | `RECORDS` | Durable stream name |
//! | `RECORD_STREAM_SUBJECTS` | platform subjects | Comma separated subject patterns |
//! | `RECORD_STREAM_STORAGE` | `file` | `file` or `memory` |
//! | `RECORD_STREAM_RETENTION` | `limits` | `limits`, `interest` or `workqueue` |
//! | `RECORD_STREAM_MAX_AGE_SECS` | `0` | Message age limit, `0` keeps forever |
//! | `RECORD_STREAM_REPLICAS` | `1` | Stream replica count |
//! | `RECORD_DURABLE_PREFIX` | `record-bus` | Prefix for durable consumer names |
//! | `RECORD_DISPATCH_CAPACITY` | `256` | Deliveries buffered ahead of the dispatcher |
//! | `RECORD_CONNECT_TIMEOUT_SECS` | `5` | Broker connection timeout |
//! | `RECORD_PRINCIPAL` | `record-bus` | Identity handlers run under |

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BusError, BusResult};
use crate::subject::{pattern_matches, PLATFORM_SUBJECTS};

/// Default deliveries buffered between broker pumps and the dispatcher.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

/// Where the broker keeps stream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    File,
    Memory,
}

impl FromStr for StorageKind {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(StorageKind::File),
            "memory" => Ok(StorageKind::Memory),
            other => Err(BusError::Config(format!("unknown stream storage {other:?}"))),
        }
    }
}

/// When the broker may discard stream messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionKind {
    #[default]
    Limits,
    Interest,
    WorkQueue,
}

impl FromStr for RetentionKind {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "limits" => Ok(RetentionKind::Limits),
            "interest" => Ok(RetentionKind::Interest),
            "workqueue" | "work_queue" => Ok(RetentionKind::WorkQueue),
            other => Err(BusError::Config(format!(
                "unknown stream retention {other:?}"
            ))),
        }
    }
}

/// Durable stream declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,
    /// Subject patterns captured by the stream.
    pub subjects: Vec<String>,
    /// Storage backend.
    pub storage: StorageKind,
    /// Retention policy.
    pub retention: RetentionKind,
    /// Maximum message age; zero keeps messages until limits evict them.
    pub max_age: Duration,
    /// Replica count.
    pub replicas: usize,
}

impl StreamConfig {
    /// A file-backed, limits-retained stream over the given subjects.
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            storage: StorageKind::default(),
            retention: RetentionKind::default(),
            max_age: Duration::ZERO,
            replicas: 1,
        }
    }

    /// Whether any of the stream's patterns captures `subject`.
    #[must_use]
    pub fn covers(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|pattern| pattern_matches(pattern, subject))
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(
            "RECORDS",
            PLATFORM_SUBJECTS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

/// Broker credentials.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    UserPassword {
        user: String,
        password: String,
    },
    Token(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => write!(f, "None"),
            Credentials::UserPassword { user, .. } => f
                .debug_struct("UserPassword")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::Token(_) => write!(f, "Token(<redacted>)"),
        }
    }
}

/// Complete bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Broker-backed bus when true, no-op bus otherwise.
    pub messaging_enabled: bool,
    /// Broker address.
    pub url: String,
    /// Broker credentials.
    pub credentials: Credentials,
    /// Durable stream declaration.
    pub stream: StreamConfig,
    /// Prefix for durable consumer names.
    pub durable_prefix: String,
    /// Deliveries buffered ahead of the dispatcher.
    pub dispatch_capacity: usize,
    /// Broker connection timeout.
    pub connect_timeout: Duration,
    /// Identity handlers run under and the origin stamped on publishes.
    pub principal: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            messaging_enabled: false,
            url: "nats://localhost:4222".to_string(),
            credentials: Credentials::None,
            stream: StreamConfig::default(),
            durable_prefix: "record-bus".to_string(),
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            connect_timeout: Duration::from_secs(5),
            principal: "record-bus".to_string(),
        }
    }
}

impl BusConfig {
    /// Broker-backed configuration for a single stream.
    pub fn with_stream(stream: StreamConfig) -> Self {
        Self {
            messaging_enabled: true,
            stream,
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> BusResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup.
    ///
    /// Unset keys fall back to defaults; set but unparsable keys are errors.
    pub fn from_lookup<F>(lookup: F) -> BusResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let credentials = match (lookup("RECORD_NATS_USER"), lookup("RECORD_NATS_TOKEN")) {
            (Some(user), _) => Credentials::UserPassword {
                user,
                password: lookup("RECORD_NATS_PASSWORD").unwrap_or_default(),
            },
            (None, Some(token)) => Credentials::Token(token),
            (None, None) => Credentials::None,
        };

        let mut stream = StreamConfig::default();
        if let Some(name) = lookup("RECORD_STREAM_NAME") {
            stream.name = name;
        }
        if let Some(subjects) = lookup("RECORD_STREAM_SUBJECTS") {
            stream.subjects = subjects
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(storage) = lookup("RECORD_STREAM_STORAGE") {
            stream.storage = storage.parse()?;
        }
        if let Some(retention) = lookup("RECORD_STREAM_RETENTION") {
            stream.retention = retention.parse()?;
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, "RECORD_STREAM_MAX_AGE_SECS")? {
            stream.max_age = Duration::from_secs(secs);
        }
        if let Some(replicas) = parse_key(&lookup, "RECORD_STREAM_REPLICAS")? {
            stream.replicas = replicas;
        }

        Ok(Self {
            messaging_enabled: lookup("RECORD_MESSAGING_ENABLED")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.messaging_enabled),
            url: lookup("RECORD_NATS_URL").unwrap_or(defaults.url),
            credentials,
            stream,
            durable_prefix: lookup("RECORD_DURABLE_PREFIX").unwrap_or(defaults.durable_prefix),
            dispatch_capacity: parse_key(&lookup, "RECORD_DISPATCH_CAPACITY")?
                .unwrap_or(defaults.dispatch_capacity)
                .max(1),
            connect_timeout: parse_key(&lookup, "RECORD_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            principal: lookup("RECORD_PRINCIPAL").unwrap_or(defaults.principal),
        })
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> BusResult<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BusError::Config(format!("{key}={raw:?} is not a valid value"))),
        None => Ok(None),
    }
}
