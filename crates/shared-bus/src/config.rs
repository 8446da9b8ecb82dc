//! In-memory broker configuration.

use crate::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_QUEUE_BACKLOG_LIMIT};
use serde::{Deserialize, Serialize};

/// Tuning knobs for [`crate::InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Per-topic broadcast buffer. Slow subscribers lag past this.
    pub channel_capacity: usize,
    /// Messages a consumer-less queue may hold before publishes fail.
    pub queue_backlog_limit: usize,
    /// Prefix the broker prepends to correlation ids on delivery.
    ///
    /// Some brokers hand back correlation ids decorated with `ID:`.
    /// Setting this reproduces that behaviour.
    pub correlation_prefix: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            queue_backlog_limit: DEFAULT_QUEUE_BACKLOG_LIMIT,
            correlation_prefix: None,
        }
    }
}

impl BrokerConfig {
    /// Decorate correlation ids with `prefix` on delivery.
    #[must_use]
    pub fn with_correlation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.correlation_prefix = Some(prefix.into());
        self
    }
}
