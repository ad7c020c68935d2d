//! Broker connection settings.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_USER_ID: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";
pub const DEFAULT_HOSTNAME: &str = "localhost";
pub const DEFAULT_VIRTUAL_HOST: &str = "/";

/// Which broker client library backs the connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MqBackend {
    /// AMQP 0.9.1 broker such as RabbitMQ
    #[default]
    Amqp,
    /// In-process exchange shared by every connection of one factory
    Memory,
}

impl FromStr for MqBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "amqp" => Ok(Self::Amqp),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown broker library: {s}")),
        }
    }
}

/// Connection settings for the harvest broker.
///
/// Every field has a default that targets a stock local RabbitMQ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub hostname: String,
    pub port: u16,
    pub user_id: String,
    pub password: String,
    pub virtual_host: String,
    pub library: MqBackend,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            port: DEFAULT_PORT,
            user_id: DEFAULT_USER_ID.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            virtual_host: DEFAULT_VIRTUAL_HOST.to_string(),
            library: MqBackend::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `HARVEST_MQ_HOSTNAME` (default: "localhost")
    /// - `HARVEST_MQ_PORT` (default: 5672; unparsable values fall back to it)
    /// - `HARVEST_MQ_USER_ID` (default: "guest")
    /// - `HARVEST_MQ_PASSWORD` (default: "guest")
    /// - `HARVEST_MQ_VIRTUAL_HOST` (default: "/")
    /// - `HARVEST_MQ_LIBRARY`: `amqp` (default) or `memory`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = match lookup("HARVEST_MQ_PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid HARVEST_MQ_PORT, using {DEFAULT_PORT}");
                DEFAULT_PORT
            }),
            None => defaults.port,
        };

        let library = match lookup("HARVEST_MQ_LIBRARY") {
            Some(raw) => raw.parse().unwrap_or_else(|e: String| {
                warn!(error = %e, "Falling back to the amqp broker library");
                MqBackend::Amqp
            }),
            None => defaults.library,
        };

        Self {
            hostname: lookup("HARVEST_MQ_HOSTNAME").unwrap_or(defaults.hostname),
            port,
            user_id: lookup("HARVEST_MQ_USER_ID").unwrap_or(defaults.user_id),
            password: lookup("HARVEST_MQ_PASSWORD").unwrap_or(defaults.password),
            virtual_host: lookup("HARVEST_MQ_VIRTUAL_HOST").unwrap_or(defaults.virtual_host),
            library,
        }
    }

    /// Config for the in-process broker.
    pub fn memory() -> Self {
        Self {
            library: MqBackend::Memory,
            ..Self::default()
        }
    }

    /// `host:port/vhost` without credentials, for logging.
    pub fn redacted(&self) -> String {
        format!("{}:{}{}", self.hostname, self.port, self.virtual_host)
    }
}
