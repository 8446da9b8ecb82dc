//! Reply Dispatcher - routes inbound replies to their waiters.
//!
//! The dispatcher is the single entry point for everything delivered on a
//! reply address. It never blocks and never raises to the transport.

use crate::adapters::pending::PendingRequestTable;
use crate::domain::correlation::{MalformedToken, TokenNormalizer};
use shared_bus::DeliveryCallback;
use shared_types::Envelope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened to one inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchOutcome {
    /// Matched a pending request and woke its waiter.
    Delivered,
    /// Well-formed but no pending request wanted it (late or foreign).
    Unmatched,
    /// Missing or unparseable correlation id.
    Malformed,
}

impl DispatchOutcome {
    /// Metric label for this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Unmatched => "unmatched",
            Self::Malformed => "malformed",
        }
    }
}

/// Dispatch counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub delivered: AtomicU64,
    pub unmatched: AtomicU64,
    pub malformed: AtomicU64,
}

impl DispatchStats {
    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::Unmatched => &self.unmatched,
            DispatchOutcome::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Observer notified of every dispatch outcome.
pub type DispatchObserver = Arc<dyn Fn(DispatchOutcome) + Send + Sync>;

/// Transport-side callback target for reply addresses.
pub struct ReplyDispatcher {
    table: Arc<PendingRequestTable>,
    normalizer: TokenNormalizer,
    stats: DispatchStats,
    observer: Option<DispatchObserver>,
}

impl ReplyDispatcher {
    /// Create a dispatcher completing requests in `table`.
    pub fn new(table: Arc<PendingRequestTable>, normalizer: TokenNormalizer) -> Self {
        Self {
            table,
            normalizer,
            stats: DispatchStats::default(),
            observer: None,
        }
    }

    /// Notify `observer` of every outcome (metrics hook).
    #[must_use]
    pub fn with_observer(mut self, observer: DispatchObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Route one inbound envelope.
    pub fn on_delivery(&self, envelope: Envelope) -> DispatchOutcome {
        let outcome = self.route(envelope);
        self.stats.record(outcome);
        if let Some(observer) = &self.observer {
            observer(outcome);
        }
        outcome
    }

    fn route(&self, envelope: Envelope) -> DispatchOutcome {
        let Some(raw) = envelope.correlation_id.as_deref() else {
            warn!(
                message_id = %envelope.message_id,
                "Reply without correlation id, dropping"
            );
            return DispatchOutcome::Malformed;
        };

        let token = match self.normalizer.normalize(raw) {
            Ok(token) => token,
            Err(MalformedToken::Empty) => {
                warn!(
                    message_id = %envelope.message_id,
                    "Reply without correlation id, dropping"
                );
                return DispatchOutcome::Malformed;
            }
            Err(err) => {
                warn!(
                    message_id = %envelope.message_id,
                    error = %err,
                    "Reply with malformed correlation id, dropping"
                );
                return DispatchOutcome::Malformed;
            }
        };

        if self.table.complete(&token, envelope.payload) {
            DispatchOutcome::Delivered
        } else {
            debug!(
                correlation_id = %token,
                message_id = %envelope.message_id,
                issued_at_ms = ?token.timestamp_ms(),
                "Unmatched or late reply, dropping"
            );
            DispatchOutcome::Unmatched
        }
    }

    /// Callback to hand to `MessageTransport::subscribe`.
    pub fn callback(self: &Arc<Self>) -> DeliveryCallback {
        let dispatcher = Arc::clone(self);
        Arc::new(move |envelope| {
            dispatcher.on_delivery(envelope);
        })
    }

    /// Get statistics
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}
