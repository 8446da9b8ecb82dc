//! Adapters for the request/reply engine.
//!
//! Infrastructure implementations for async waiting, reply dispatch and
//! reply-address lifecycle.

pub mod dispatcher;
pub mod pending;
pub mod reply_address;

pub use dispatcher::{DispatchObserver, DispatchOutcome, DispatchStats, ReplyDispatcher};
pub use pending::{
    sweep_task, PendingRequestTable, PendingState, PendingStats, PendingStatsSnapshot,
    ReplyOutcome, WaiterHandle,
};
pub use reply_address::{DedicatedReplyAddress, ReplyAddress, ReplyAddressManager};
