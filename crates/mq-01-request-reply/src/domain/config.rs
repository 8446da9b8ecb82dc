//! Request/reply configuration with validation.

use crate::domain::correlation::{TokenNormalizer, BROKER_ID_PREFIX};
use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use shared_types::DeliveryMode;
use std::time::Duration;

/// Default reply timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default period of the deadline sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// How reply addresses are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyAddressMode {
    /// One ephemeral address per session, shared by all its requests.
    #[default]
    PerSession,
    /// A fresh address for every request, released when it finishes.
    PerRequest,
}

/// Request/reply client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestReplyConfig {
    /// Timeout used by `request_with_default_timeout`
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Reply address allocation strategy
    pub reply_address_mode: ReplyAddressMode,
    /// Delivery mode stamped on outgoing requests
    pub request_delivery_mode: DeliveryMode,
    /// Prefixes stripped from inbound correlation ids before matching
    pub correlation_prefixes: Vec<String>,
    /// Period of the background deadline sweeper
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for RequestReplyConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REPLY_TIMEOUT,
            reply_address_mode: ReplyAddressMode::PerSession,
            request_delivery_mode: DeliveryMode::NonPersistent,
            correlation_prefixes: vec![BROKER_ID_PREFIX.to_string()],
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RequestReplyConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "default_timeout cannot be 0".into(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "sweep_interval cannot be 0".into(),
            ));
        }

        if let Some(prefix) = self
            .correlation_prefixes
            .iter()
            .find(|p| p.trim().is_empty())
        {
            return Err(ConfigError::InvalidPrefix(format!(
                "prefix {:?} is blank",
                prefix
            )));
        }

        Ok(())
    }

    /// Use a per-request reply address.
    #[must_use]
    pub fn with_reply_address_mode(mut self, mode: ReplyAddressMode) -> Self {
        self.reply_address_mode = mode;
        self
    }

    /// Override the default timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Normalizer for the configured prefixes.
    pub fn normalizer(&self) -> TokenNormalizer {
        TokenNormalizer::new(self.correlation_prefixes.iter().cloned())
    }
}
