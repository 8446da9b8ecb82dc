//! # Message Envelope
//!
//! The universal wrapper for everything that crosses the transport.
//!
//! ## Correlation Properties
//!
//! - **Requests** carry a non-empty `correlation_id` and a `reply_to`.
//! - **Replies** echo the request's `correlation_id` verbatim and carry no
//!   `reply_to`.
//! - **Plain messages** (topic publishes, queue sends) carry neither.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// How hard the transport should try to keep a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Survives broker restarts where the transport supports it.
    Persistent,
    /// Best effort. Used for requests and replies.
    #[default]
    NonPersistent,
}

/// A named place on the broker that messages are published to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Fan-out: every active subscriber gets a copy.
    Topic(String),
    /// Point-to-point: exactly one consumer gets each message.
    Queue(String),
    /// Point-to-point queue owned by a single session.
    TemporaryQueue(String),
}

impl Destination {
    /// Create a topic destination.
    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic(name.into())
    }

    /// Create a durable queue destination.
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    /// Name of the destination without its kind.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Topic(name) | Self::Queue(name) | Self::TemporaryQueue(name) => name,
        }
    }

    /// Returns true for session-owned temporary destinations.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::TemporaryQueue(_))
    }

    /// Returns true for point-to-point destinations (durable or temporary).
    #[must_use]
    pub fn is_queue(&self) -> bool {
        matches!(self, Self::Queue(_) | Self::TemporaryQueue(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topic(name) => write!(f, "topic://{}", name),
            Self::Queue(name) => write!(f, "queue://{}", name),
            Self::TemporaryQueue(name) => write!(f, "temp-queue://{}", name),
        }
    }
}

/// Identifier of one client session on the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as it travels through the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Transport-level identity of this particular message.
    pub message_id: Uuid,

    /// Unix timestamp (milliseconds) when the envelope was created.
    pub timestamp: u64,

    /// Opaque application payload.
    pub payload: Bytes,

    /// Correlation token.
    /// For requests: freshly generated by the requester.
    /// For replies: copied unmodified from the request.
    pub correlation_id: Option<String>,

    /// Where the responder must send its reply. Requests only.
    pub reply_to: Option<Destination>,

    /// Delivery guarantee requested from the transport.
    pub delivery_mode: DeliveryMode,
}

impl Envelope {
    /// Create a plain envelope around a payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            timestamp: now_millis(),
            payload: payload.into(),
            correlation_id: None,
            reply_to: None,
            delivery_mode: DeliveryMode::default(),
        }
    }

    /// Create an envelope carrying UTF-8 text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Bytes::from(text.into()))
    }

    /// Create a request envelope. Both the token and the reply address are mandatory.
    pub fn request(
        payload: impl Into<Bytes>,
        correlation_id: impl Into<String>,
        reply_to: Destination,
    ) -> Self {
        Self::new(payload)
            .with_correlation_id(correlation_id)
            .with_reply_to(reply_to)
    }

    /// Create a reply envelope echoing the request's correlation string.
    pub fn reply(payload: impl Into<Bytes>, correlation_id: Option<String>) -> Self {
        let mut envelope = Self::new(payload);
        envelope.correlation_id = correlation_id;
        envelope
    }

    /// Set the correlation token.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the reply destination.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: Destination) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Set the delivery mode.
    #[must_use]
    pub fn with_delivery_mode(mut self, delivery_mode: DeliveryMode) -> Self {
        self.delivery_mode = delivery_mode;
        self
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Returns true if the envelope expects a reply.
    #[must_use]
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
