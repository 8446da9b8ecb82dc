//! Replier - the responding side of request/reply.
//!
//! Listens on a request source, runs each request through a handler and
//! publishes the result to the destination the request carried, echoing the
//! request's correlation string unmodified.

use crate::ports::inbound::ReplyHandler;
use crate::ports::outbound::MessageTransport;
use shared_types::{DeliveryMode, Destination, Envelope, TransportError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// What the replier did with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    /// A reply was published.
    Replied,
    /// The request carried no reply-to and was dropped.
    NoReplyTo,
    /// Publishing the reply failed.
    PublishFailed,
}

/// Counters returned when [`Replier::serve_replies`] stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplierSummary {
    pub handled: u64,
    pub dropped_without_reply_to: u64,
    pub publish_failures: u64,
}

impl ReplierSummary {
    fn record(&mut self, disposition: ReplyDisposition) {
        match disposition {
            ReplyDisposition::Replied => self.handled += 1,
            ReplyDisposition::NoReplyTo => self.dropped_without_reply_to += 1,
            ReplyDisposition::PublishFailed => self.publish_failures += 1,
        }
    }
}

/// Responds to requests arriving on one source destination.
pub struct Replier {
    transport: Arc<dyn MessageTransport>,
    source: Destination,
}

impl Replier {
    pub fn new(transport: Arc<dyn MessageTransport>, source: Destination) -> Self {
        Self { transport, source }
    }

    /// Destination requests are read from.
    pub fn source(&self) -> &Destination {
        &self.source
    }

    /// Serve requests until `shutdown` flips to true or the subscription ends.
    ///
    /// The transport callback only forwards into a channel; handling and
    /// publishing happen on the calling task.
    pub async fn serve_replies<H>(
        &self,
        handler: H,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ReplierSummary, TransportError>
    where
        H: ReplyHandler,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let subscription = self
            .transport
            .subscribe(
                &self.source,
                Arc::new(move |envelope| {
                    let _ = tx.send(envelope);
                }),
            )
            .await?;

        info!(source = %self.source, "Replier listening for requests");

        let mut summary = ReplierSummary::default();
        if *shutdown.borrow() {
            subscription.cancel();
            return Ok(summary);
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = rx.recv() => {
                    let Some(request) = next else {
                        debug!(source = %self.source, "Request subscription closed");
                        break;
                    };
                    summary.record(self.handle_request(&handler, request).await);
                }
            }
        }

        subscription.cancel();
        info!(
            source = %self.source,
            handled = summary.handled,
            dropped = summary.dropped_without_reply_to,
            publish_failures = summary.publish_failures,
            "Replier stopped"
        );
        Ok(summary)
    }

    /// Reply to a single request.
    pub async fn handle_request<H>(&self, handler: &H, request: Envelope) -> ReplyDisposition
    where
        H: ReplyHandler + ?Sized,
    {
        let Some(reply_to) = request.reply_to else {
            info!(
                message_id = %request.message_id,
                "Request without reply-to, dropping"
            );
            return ReplyDisposition::NoReplyTo;
        };

        if request.correlation_id.is_none() {
            warn!(
                message_id = %request.message_id,
                reply_to = %reply_to,
                "Request without correlation id, replying uncorrelated"
            );
        }

        let payload = handler.handle(request.payload);
        let reply = Envelope::reply(payload, request.correlation_id)
            .with_delivery_mode(DeliveryMode::NonPersistent);
        let correlation_id = reply.correlation_id.clone();

        match self.transport.publish(&reply_to, reply).await {
            Ok(()) => {
                debug!(
                    correlation_id = ?correlation_id,
                    reply_to = %reply_to,
                    "Reply sent"
                );
                ReplyDisposition::Replied
            }
            Err(err) => {
                warn!(
                    correlation_id = ?correlation_id,
                    reply_to = %reply_to,
                    error = %err,
                    "Failed to publish reply"
                );
                ReplyDisposition::PublishFailed
            }
        }
    }
}
