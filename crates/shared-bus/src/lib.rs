//! # Shared Bus - Message Transport
//!
//! Defines the transport port every messaging component talks to, and ships
//! an in-memory broker implementing it.
//!
//! ## Transport Primitives
//!
//! - `publish(destination, envelope)`
//! - `create_ephemeral_destination(session)` / `delete_ephemeral_destination`
//! - `subscribe(destination, callback) -> Subscription`
//!
//! ## Destination Semantics (in-memory broker)
//!
//! ```text
//!  Topic            Queue                  TemporaryQueue
//!  ─────            ─────                  ──────────────
//!  fan-out to       one consumer per       like Queue, but owned by a
//!  all live         message (round-robin), session and must be created
//!  subscribers;     backlog while no       before use; publishing to a
//!  dropped when     consumer is attached   deleted one fails
//!  nobody listens
//! ```
//!
//! Callbacks run on broker-owned tokio tasks, one per subscription. A
//! panicking callback is contained and the delivery loop keeps going.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use config::BrokerConfig;
pub use publisher::{InMemoryBroker, MessageTransport};
pub use subscriber::{DeliveryCallback, Subscription};

pub use shared_types::{DeliveryMode, Destination, Envelope, SessionId, TransportError};

/// Maximum messages to buffer per topic subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Maximum messages a queue holds while it has no consumer.
pub const DEFAULT_QUEUE_BACKLOG_LIMIT: usize = 10_000;

/// Name prefix for temporary queues created by the in-memory broker.
pub const TEMPORARY_QUEUE_PREFIX: &str = "#P2P/QTMP";
