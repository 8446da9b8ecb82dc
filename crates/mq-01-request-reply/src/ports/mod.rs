//! Ports Layer - Hexagonal Architecture
//!
//! Inbound ports are what callers use to drive the engine; outbound ports
//! are what the engine needs from the broker.

pub mod inbound;
pub mod outbound;

pub use inbound::{ReplyHandler, RequestReplyApi};
pub use outbound::{DeliveryCallback, MessageTransport, Subscription};
