//! # Shared Types Crate
//!
//! This crate contains the message envelope, destination addressing and
//! transport error types used by every other crate in the workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: The `Envelope` is the only shape a message
//!   takes on the transport, for plain publishes, requests and replies alike.
//! - **Opaque Correlation**: The envelope carries the correlation token as a
//!   string. Transports may decorate it; matching logic normalizes it.
//! - **Explicit Reply Routing**: A request names its reply destination in
//!   `reply_to`; responders never assume a statically configured address.

pub mod envelope;
pub mod errors;

pub use envelope::{DeliveryMode, Destination, Envelope, SessionId};
pub use errors::TransportError;
