//! # Error Types
//!
//! Errors raised at the transport boundary.

use crate::envelope::Destination;
use thiserror::Error;

/// Failures of publish, subscribe or destination management.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The destination does not exist (e.g. a released temporary queue).
    #[error("Destination not found: {0}")]
    DestinationNotFound(Destination),

    /// A queue with no consumers has reached its backlog limit.
    #[error("Queue {destination} is full ({capacity} messages buffered)")]
    QueueFull {
        destination: Destination,
        capacity: usize,
    },

    /// The transport has been shut down.
    #[error("Transport closed")]
    Closed,

    /// Publishing failed for a transport-specific reason.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribing failed for a transport-specific reason.
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
}
