//! Services: the requesting client and the responding replier.

pub mod client;
pub mod replier;

pub use client::{PendingReply, RequestReplyClient, RequestReplyClientBuilder};
pub use replier::{Replier, ReplierSummary, ReplyDisposition};
