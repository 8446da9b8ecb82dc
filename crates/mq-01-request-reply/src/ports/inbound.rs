//! Inbound Ports (Driving Ports)
//!
//! These traits define the API that callers use to interact with the
//! request/reply engine.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::domain::{CorrelationId, RequestResult};

/// Requesting side (Driving Port)
#[async_trait]
pub trait RequestReplyApi: Send + Sync {
    /// Send `payload` and wait up to `timeout` for the correlated reply.
    ///
    /// # Errors
    ///
    /// - `RequestError::Transport` - publishing or reply-address setup failed
    /// - `RequestError::Timeout` - no reply before the deadline
    /// - `RequestError::Cancelled` - cancelled while waiting
    async fn request(&self, payload: Bytes, timeout: Duration) -> RequestResult<Bytes>;

    /// Cancel an outstanding request. Returns false if it already finished.
    fn cancel(&self, token: &CorrelationId) -> bool;
}

/// Responding side: turns a request payload into a reply payload.
pub trait ReplyHandler: Send + Sync {
    /// Build the reply for one request.
    fn handle(&self, request: Bytes) -> Bytes;
}

impl<F> ReplyHandler for F
where
    F: Fn(Bytes) -> Bytes + Send + Sync,
{
    fn handle(&self, request: Bytes) -> Bytes {
        self(request)
    }
}
