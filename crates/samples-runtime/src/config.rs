//! # Samples Configuration
//!
//! Which tutorials to run and against which destinations. Everything can be
//! overridden from the environment; defaults match the getting-started
//! tutorials.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Topic the requestor publishes to and the replier listens on.
pub const DEFAULT_REQUEST_TOPIC: &str = "T/GettingStarted/requests";

/// Topic used by the publish/subscribe tutorial.
pub const DEFAULT_PUBSUB_TOPIC: &str = "T/GettingStarted/pubsub";

/// Queue used by the producer/consumer tutorial.
pub const DEFAULT_QUEUE: &str = "Q/tutorial";

/// Which tutorial to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    RequestReply,
    PubSub,
    Queue,
    All,
}

impl Scenario {
    /// Returns true if this selection includes `other`.
    pub fn includes(&self, other: Scenario) -> bool {
        *self == Scenario::All || *self == other
    }
}

impl FromStr for Scenario {
    type Err = SamplesConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "request-reply" | "request_reply" | "requestreply" | "rr" => Ok(Self::RequestReply),
            "pubsub" | "pub-sub" | "pub_sub" | "topic" => Ok(Self::PubSub),
            "queue" | "p2p" => Ok(Self::Queue),
            "all" => Ok(Self::All),
            other => Err(SamplesConfigError::UnknownScenario(other.to_string())),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestReply => "request-reply",
            Self::PubSub => "pubsub",
            Self::Queue => "queue",
            Self::All => "all",
        };
        f.write_str(name)
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplesConfigError {
    #[error("unknown scenario {0:?} (expected request-reply, pubsub, queue or all)")]
    UnknownScenario(String),

    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}

/// Complete samples configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplesConfig {
    /// Tutorial selection.
    pub scenario: Scenario,
    /// Concurrent requests issued by the request/reply tutorial.
    pub request_count: usize,
    /// How long each request waits for its reply.
    pub reply_timeout: Duration,
    /// Topic requests are published to.
    pub request_topic: String,
    /// Topic used by the publish/subscribe tutorial.
    pub pubsub_topic: String,
    /// Queue used by the producer/consumer tutorial.
    pub queue_name: String,
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            scenario: Scenario::All,
            request_count: 1,
            reply_timeout: Duration::from_secs(10),
            request_topic: DEFAULT_REQUEST_TOPIC.to_string(),
            pubsub_topic: DEFAULT_PUBSUB_TOPIC.to_string(),
            queue_name: DEFAULT_QUEUE.to_string(),
        }
    }
}

impl SamplesConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SAMPLES_SCENARIO`: request-reply, pubsub, queue or all (default: all)
    /// - `SAMPLES_REQUEST_COUNT`: concurrent requests (default: 1)
    /// - `SAMPLES_REPLY_TIMEOUT_MS`: reply timeout in ms (default: 10000)
    /// - `SAMPLES_REQUEST_TOPIC`: default T/GettingStarted/requests
    /// - `SAMPLES_PUBSUB_TOPIC`: default T/GettingStarted/pubsub
    /// - `SAMPLES_QUEUE`: default Q/tutorial
    pub fn from_env() -> Result<Self, SamplesConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SamplesConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("SAMPLES_SCENARIO") {
            config.scenario = value.parse()?;
        }
        if let Some(value) = lookup("SAMPLES_REQUEST_COUNT") {
            config.request_count = parse_positive("SAMPLES_REQUEST_COUNT", &value)? as usize;
        }
        if let Some(value) = lookup("SAMPLES_REPLY_TIMEOUT_MS") {
            config.reply_timeout =
                Duration::from_millis(parse_positive("SAMPLES_REPLY_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = lookup("SAMPLES_REQUEST_TOPIC") {
            config.request_topic = value;
        }
        if let Some(value) = lookup("SAMPLES_PUBSUB_TOPIC") {
            config.pubsub_topic = value;
        }
        if let Some(value) = lookup("SAMPLES_QUEUE") {
            config.queue_name = value;
        }

        Ok(config)
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, SamplesConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(SamplesConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        }),
    }
}
