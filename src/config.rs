//! Messaging configuration.
//!
//! Loaded once at startup, usually from a TOML file:
//!
//! ```toml
//! [broker]
//! url = "tcp://localhost:61616"
//! operation_timeout_ms = 5000
//!
//! [redelivery]
//! max_redeliveries = 2
//! initial_delay_ms = 2000
//! redelivery_delay_ms = 2000
//! use_exponential_backoff = false
//! dlq_suffix = ".DLQ"
//!
//! [listener]
//! concurrency = 1
//! ```
//!
//! Every section and field is optional; missing values take the defaults
//! shown above.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::WireFormat;
use crate::redelivery::{RedeliveryPolicy, DEFAULT_DLQ_SUFFIX};

pub const BROKER_URL_ENV: &str = "MSGRELAY_BROKER_URL";
pub const BROKER_USERNAME_ENV: &str = "MSGRELAY_BROKER_USERNAME";
pub const BROKER_PASSWORD_ENV: &str = "MSGRELAY_BROKER_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub broker: BrokerSettings,
    pub redelivery: RedeliverySettings,
    pub listener: ListenerSettings,
    pub producer: ProducerSettings,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Bounded wait for publish and acknowledgment round-trips.
    pub operation_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "tcp://localhost:61616".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            operation_timeout_ms: 5000,
        }
    }
}

impl std::fmt::Debug for BrokerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .finish()
    }
}

impl BrokerSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedeliverySettings {
    pub max_redeliveries: u32,
    pub initial_delay_ms: u64,
    pub redelivery_delay_ms: u64,
    pub use_exponential_backoff: bool,
    pub maximum_redelivery_delay_ms: Option<u64>,
    pub dlq_suffix: String,
}

impl Default for RedeliverySettings {
    fn default() -> Self {
        Self {
            max_redeliveries: 2,
            initial_delay_ms: 2000,
            redelivery_delay_ms: 2000,
            use_exponential_backoff: false,
            maximum_redelivery_delay_ms: None,
            dlq_suffix: DEFAULT_DLQ_SUFFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    /// Consumer slots per destination. 1 keeps attempt ordering deterministic.
    pub concurrency: usize,
    /// How long one poll waits for a message.
    pub receive_timeout_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            receive_timeout_ms: 1000,
        }
    }
}

impl ListenerSettings {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    pub persistent: bool,
    pub format: WireFormat,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            persistent: true,
            format: WireFormat::Json,
        }
    }
}

impl MessagingConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?.with_env_overrides())
    }

    /// Override broker location and credentials from `MSGRELAY_BROKER_*`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BROKER_URL_ENV) {
            self.broker.url = url;
        }
        if let Ok(username) = std::env::var(BROKER_USERNAME_ENV) {
            self.broker.username = username;
        }
        if let Ok(password) = std::env::var(BROKER_PASSWORD_ENV) {
            self.broker.password = password;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.url.is_empty() {
            return Err(ConfigError::Invalid("broker.url must not be empty".into()));
        }
        if self.broker.operation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "broker.operation_timeout_ms must be positive".into(),
            ));
        }
        if self.redelivery.dlq_suffix.is_empty() {
            return Err(ConfigError::Invalid(
                "redelivery.dlq_suffix must not be empty".into(),
            ));
        }
        if let Some(cap) = self.redelivery.maximum_redelivery_delay_ms {
            if cap < self.redelivery.redelivery_delay_ms {
                return Err(ConfigError::Invalid(format!(
                    "redelivery.maximum_redelivery_delay_ms ({}) is below redelivery_delay_ms ({})",
                    cap, self.redelivery.redelivery_delay_ms
                )));
            }
        }
        if self.listener.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "listener.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Build the redelivery policy described by the `[redelivery]` section.
    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        let r = &self.redelivery;
        let policy = RedeliveryPolicy::new(r.max_redeliveries, Duration::from_millis(r.redelivery_delay_ms))
            .with_initial_delay(Duration::from_millis(r.initial_delay_ms))
            .with_exponential_backoff(r.use_exponential_backoff)
            .with_dlq_suffix(r.dlq_suffix.clone());

        let policy = match r.maximum_redelivery_delay_ms {
            Some(cap) => policy.with_maximum_redelivery_delay(Duration::from_millis(cap)),
            None => policy,
        };

        tracing::info!(
            max_redeliveries = policy.max_redeliveries(),
            initial_delay_ms = r.initial_delay_ms,
            redelivery_delay_ms = r.redelivery_delay_ms,
            exponential = policy.use_exponential_backoff(),
            "redelivery policy configured"
        );
        policy
    }
}
