//! Request/reply error types.

use crate::domain::correlation::CorrelationId;
use shared_types::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result alias for client operations.
pub type RequestResult<T> = Result<T, RequestError>;

/// Why a request did not produce a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The transport refused an operation. Propagated unchanged.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No reply arrived before the deadline.
    #[error("no reply for {token} within {timeout:?}")]
    Timeout {
        token: CorrelationId,
        timeout: Duration,
    },

    /// The request was cancelled before a reply arrived.
    #[error("request {token} was cancelled")]
    Cancelled { token: CorrelationId },

    /// The generator produced a token that is already pending.
    #[error("correlation token {0} is already pending")]
    DuplicateToken(CorrelationId),
}

impl RequestError {
    /// Returns true for the timeout outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Pending table failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PendingError {
    #[error("correlation token {0} is already registered")]
    DuplicateToken(CorrelationId),
}

impl From<PendingError> for RequestError {
    fn from(err: PendingError) -> Self {
        match err {
            PendingError::DuplicateToken(token) => Self::DuplicateToken(token),
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// Invalid correlation prefix
    #[error("invalid correlation prefix: {0}")]
    InvalidPrefix(String),
}
