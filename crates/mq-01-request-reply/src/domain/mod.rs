//! Domain types for request/reply correlation.
//!
//! Tokens, configuration and errors. Async infrastructure (the pending table,
//! dispatch, reply addresses) lives in the adapters layer.

pub mod config;
pub mod correlation;
pub mod error;

// Re-exports for convenience
pub use config::{ReplyAddressMode, RequestReplyConfig};
pub use correlation::{
    CorrelationId, MalformedToken, TokenGenerator, TokenNormalizer, UuidTokenGenerator,
};
pub use error::{ConfigError, PendingError, RequestError, RequestResult};
