//! # MQ-01 Request/Reply
//!
//! Request/reply correlation over an asynchronous, connectionless transport.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): tokens, configuration, errors
//!   - `CorrelationId`: UUID v7 correlation token
//!   - `TokenNormalizer`: strips broker decoration (`ID:`) before matching
//!   - `RequestReplyConfig`: configuration with validation
//!
//! - **Ports Layer** (`ports/`): trait definitions
//!   - `RequestReplyApi`, `ReplyHandler`: driving ports
//!   - `MessageTransport`: driven port (from `shared-bus`)
//!
//! - **Adapters Layer** (`adapters/`): async infrastructure
//!   - `PendingRequestTable` + `WaiterHandle`: token to waiter mapping
//!   - `ReplyDispatcher`: transport callback routing replies to waiters
//!   - `ReplyAddressManager`: ephemeral reply destination lifecycle
//!
//! - **Service Layer** (`service/`): orchestration
//!   - `RequestReplyClient`: implements `RequestReplyApi`
//!   - `Replier`: answers requests on a source destination
//!
//! ## Flow
//!
//! ```text
//!  request(payload, timeout)
//!     │ token := next_token()
//!     │ reply_to := acquire(session)          ┌──────────────┐
//!     │ waiter := register(token, deadline)   │  Transport   │
//!     │ publish(target, {payload, token,      │              │
//!     ├────────────── reply_to}) ────────────▶│   target ────┼──▶ Replier
//!     │                                       │              │      │
//!     │ waiter.wait()                         │   reply_to ◀─┼──────┘
//!     │      ▲                                └──────┬───────┘
//!     │      │ complete(token, payload)              │ on_delivery
//!     │      └──────────── ReplyDispatcher ◀─────────┘
//!     ▼
//!  Ok(reply) | Timeout | Cancelled | Transport
//! ```
//!
//! ## Invariants
//!
//! - Each token reaches exactly one terminal state; its waiter is woken once.
//! - A reply arriving after the terminal state is dropped, never delivered.
//! - One session creates at most one reply destination in the default mode.
//!
//! ## Usage Example
//!
//! ```ignore
//! use mq_01_request_reply::{RequestReplyClient, RequestReplyConfig};
//!
//! let client = RequestReplyClient::new(transport, Destination::topic("T/requests"), RequestReplyConfig::default())?;
//! let reply = client.request("ping", Duration::from_secs(10)).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

// Re-exports for public API
pub use adapters::{
    DispatchObserver, DispatchOutcome, DispatchStats, PendingRequestTable, PendingState,
    PendingStatsSnapshot, ReplyAddress, ReplyAddressManager, ReplyDispatcher, ReplyOutcome,
    WaiterHandle,
};
pub use domain::{
    ConfigError, CorrelationId, MalformedToken, PendingError, ReplyAddressMode, RequestError,
    RequestReplyConfig, RequestResult, TokenGenerator, TokenNormalizer, UuidTokenGenerator,
};
pub use ports::{ReplyHandler, RequestReplyApi};
pub use service::{
    PendingReply, Replier, ReplierSummary, ReplyDisposition, RequestReplyClient,
    RequestReplyClientBuilder,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
