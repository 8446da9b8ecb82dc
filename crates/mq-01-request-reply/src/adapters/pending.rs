//! Pending Request Table - maps correlation tokens to suspended callers.
//!
//! Every registration starts `Pending` and moves to exactly one terminal
//! state. Transitions for one token are serialized by the map's shard lock;
//! distinct tokens proceed in parallel.
//!
//! ```text
//!              complete()
//!   Pending ─────────────▶ Completed
//!      │  \    expire()
//!      │   ───────────────▶ TimedOut
//!      │       cancel() / handle dropped
//!      └──────────────────▶ Cancelled
//! ```
//!
//! The entry stays in the table until its [`WaiterHandle`] is consumed or
//! dropped, so a late reply always finds a terminal entry (or nothing) and
//! can never resurrect a finished request.

use crate::domain::correlation::CorrelationId;
use crate::domain::error::PendingError;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Lifecycle state of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingState {
    Pending,
    Completed,
    TimedOut,
    Cancelled,
}

impl PendingState {
    /// Returns true for Completed, TimedOut and Cancelled.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What a waiter observes when its request finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// The reply payload.
    Completed(Bytes),
    TimedOut,
    Cancelled,
}

impl ReplyOutcome {
    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> PendingState {
        match self {
            Self::Completed(_) => PendingState::Completed,
            Self::TimedOut => PendingState::TimedOut,
            Self::Cancelled => PendingState::Cancelled,
        }
    }
}

/// A request waiting for its reply
struct PendingEntry {
    /// Current state
    state: PendingState,
    /// Single-use completion signal, taken on the first transition
    sender: Option<oneshot::Sender<ReplyOutcome>>,
    /// When the request was registered
    created_at: Instant,
    /// When the request times out
    deadline: Instant,
}

/// Statistics for the pending table
#[derive(Debug, Default)]
pub struct PendingStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Total requests completed with a reply
    pub total_completed: AtomicU64,
    /// Total requests timed out
    pub total_timeouts: AtomicU64,
    /// Total requests cancelled (explicitly or abandoned)
    pub total_cancelled: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStatsSnapshot {
    pub registered: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
}

impl PendingStats {
    /// Read all counters.
    pub fn snapshot(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.total_registered.load(Ordering::Relaxed),
            completed: self.total_completed.load(Ordering::Relaxed),
            timed_out: self.total_timeouts.load(Ordering::Relaxed),
            cancelled: self.total_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Concurrency-safe mapping from token to waiter.
///
/// Flow:
/// 1. Client generates a token and calls `register()` to get a [`WaiterHandle`]
/// 2. Client publishes the request carrying the token
/// 3. The dispatcher receives the reply and calls `complete()`
/// 4. Client awaits the handle, which expires the entry at its deadline
#[derive(Default)]
pub struct PendingRequestTable {
    /// Map of token to pending entry
    entries: DashMap<CorrelationId, PendingEntry>,
    /// Statistics
    stats: PendingStats,
}

impl PendingRequestTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token and get the handle its caller suspends on.
    ///
    /// Fails if the token is already present in any state.
    pub fn register(
        self: &Arc<Self>,
        token: CorrelationId,
        deadline: Instant,
    ) -> Result<WaiterHandle, PendingError> {
        let (tx, rx) = oneshot::channel();

        match self.entries.entry(token) {
            Entry::Occupied(_) => {
                error!(
                    correlation_id = %token,
                    "Duplicate correlation token registered"
                );
                return Err(PendingError::DuplicateToken(token));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    state: PendingState::Pending,
                    sender: Some(tx),
                    created_at: Instant::now(),
                    deadline,
                });
            }
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = %token, "Registered pending request");

        Ok(WaiterHandle {
            table: Arc::clone(self),
            token,
            deadline,
            receiver: Some(rx),
        })
    }

    /// Complete a pending request with its reply payload.
    ///
    /// Returns false if the token is unknown or already terminal.
    pub fn complete(&self, token: &CorrelationId, payload: Bytes) -> bool {
        self.transition(token, ReplyOutcome::Completed(payload))
    }

    /// Mark a pending request as timed out.
    pub fn expire(&self, token: &CorrelationId) -> bool {
        self.transition(token, ReplyOutcome::TimedOut)
    }

    /// Cancel a pending request.
    pub fn cancel(&self, token: &CorrelationId) -> bool {
        self.transition(token, ReplyOutcome::Cancelled)
    }

    /// Cancel every pending request. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let tokens: Vec<CorrelationId> = self.entries.iter().map(|e| *e.key()).collect();
        tokens.iter().filter(|token| self.cancel(token)).count()
    }

    /// Expire every pending request whose deadline has passed.
    ///
    /// Returns the number of requests expired.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|e| e.state == PendingState::Pending && e.deadline <= now)
            .map(|e| *e.key())
            .collect();
        overdue.iter().filter(|token| self.expire(token)).count()
    }

    /// Current state of a token, if it is still in the table.
    pub fn state(&self, token: &CorrelationId) -> Option<PendingState> {
        self.entries.get(token).map(|e| e.state)
    }

    /// Check if a token is in the table (any state)
    pub fn contains(&self, token: &CorrelationId) -> bool {
        self.entries.contains_key(token)
    }

    /// Number of requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == PendingState::Pending)
            .count()
    }

    /// Number of entries in the table, terminal ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }

    fn transition(&self, token: &CorrelationId, outcome: ReplyOutcome) -> bool {
        let Some(mut entry) = self.entries.get_mut(token) else {
            return false;
        };
        if entry.state.is_terminal() {
            return false;
        }

        let state = outcome.state();
        entry.state = state;
        let elapsed = entry.created_at.elapsed();
        if let Some(sender) = entry.sender.take() {
            // Receiver gone means the handle is being dropped; its discard removes the entry.
            let _ = sender.send(outcome);
        }
        drop(entry);

        match state {
            PendingState::Completed => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %token,
                    response_time_ms = elapsed.as_millis() as u64,
                    "Completed pending request"
                );
            }
            PendingState::TimedOut => {
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %token,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Pending request timed out"
                );
            }
            PendingState::Cancelled => {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %token, "Cancelled pending request");
            }
            PendingState::Pending => {}
        }
        true
    }

    /// Remove a token on behalf of its handle.
    fn discard(&self, token: &CorrelationId) {
        if let Some((_, entry)) = self.entries.remove(token) {
            if entry.state == PendingState::Pending {
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(correlation_id = %token, "Waiter abandoned, request cancelled");
            }
        }
    }
}

/// The single-use handle a caller suspends on.
///
/// Consuming it with [`WaiterHandle::wait`] or dropping it removes the entry
/// from the table. Dropping it while still pending counts as a cancellation.
pub struct WaiterHandle {
    table: Arc<PendingRequestTable>,
    token: CorrelationId,
    deadline: Instant,
    receiver: Option<oneshot::Receiver<ReplyOutcome>>,
}

impl WaiterHandle {
    /// Token this handle waits on.
    pub fn token(&self) -> CorrelationId {
        self.token
    }

    /// When the request times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Suspend until the request reaches a terminal state.
    ///
    /// At the deadline the entry is expired; if a reply won the race the
    /// reply is returned instead.
    pub async fn wait(mut self) -> ReplyOutcome {
        let Some(mut rx) = self.receiver.take() else {
            return ReplyOutcome::Cancelled;
        };

        match tokio::time::timeout_at(self.deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => ReplyOutcome::Cancelled,
            Err(_) => {
                self.table.expire(&self.token);
                // Whichever transition won has already sent under the entry lock.
                rx.await.unwrap_or(ReplyOutcome::Cancelled)
            }
        }
    }
}

impl Drop for WaiterHandle {
    fn drop(&mut self) {
        self.table.discard(&self.token);
    }
}

impl std::fmt::Debug for WaiterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaiterHandle")
            .field("token", &self.token)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Background task expiring overdue requests.
///
/// Backs up the per-request deadline in [`WaiterHandle::wait`] for callers
/// that registered but are not currently awaiting.
pub async fn sweep_task(table: Arc<PendingRequestTable>, interval: Duration) {
    let mut sweep_interval = tokio::time::interval(interval);
    sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        sweep_interval.tick().await;
        let expired = table.expire_overdue();
        if expired > 0 {
            debug!(expired = expired, "Expired overdue pending requests");
        }
    }
}
