//! Outbound Ports (Driven Ports)
//!
//! The engine needs four primitives from the broker: publish, subscribe, and
//! create/delete of session-owned temporary destinations. The trait lives in
//! `shared-bus` so that every messaging component shares one definition.

pub use shared_bus::{DeliveryCallback, MessageTransport, Subscription};
