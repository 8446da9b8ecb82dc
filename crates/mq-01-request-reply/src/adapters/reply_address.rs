//! Reply Address Manager - owns the ephemeral destinations replies come back on.
//!
//! In the default mode every session gets one temporary destination, created
//! lazily on first use and shared by all of its requests. Concurrent first
//! calls for a session create exactly one destination.

use crate::adapters::dispatcher::ReplyDispatcher;
use crate::ports::outbound::{MessageTransport, Subscription};
use dashmap::DashMap;
use shared_types::{Destination, SessionId, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// A destination replies for one session are delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyAddress {
    pub session: SessionId,
    pub destination: Destination,
}

/// An allocated address together with its dispatcher subscription.
struct ActiveAddress {
    address: ReplyAddress,
    subscription: Subscription,
}

/// A reply address used by exactly one request.
///
/// Release it with [`ReplyAddressManager::release_dedicated`]. If it is
/// dropped instead, the subscription stops and deletion of the destination
/// is spawned on the current runtime.
pub struct DedicatedReplyAddress {
    destination: Destination,
    active: Option<ActiveAddress>,
    transport: Arc<dyn MessageTransport>,
}

impl DedicatedReplyAddress {
    /// Destination replies should be sent to.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Stop the subscription and delete the destination.
    pub async fn release(mut self) -> Result<(), TransportError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        active.subscription.cancel();
        delete_destination(self.transport.as_ref(), &self.destination).await
    }
}

impl std::fmt::Debug for DedicatedReplyAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedicatedReplyAddress")
            .field("destination", &self.destination)
            .finish()
    }
}

impl Drop for DedicatedReplyAddress {
    fn drop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.subscription.cancel();

        let destination = self.destination.clone();
        let transport = Arc::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = transport.delete_ephemeral_destination(&destination).await {
                        debug!(destination = %destination, error = %err, "Dedicated reply address already gone");
                    }
                });
            }
            Err(_) => {
                warn!(destination = %destination, "No runtime to delete dedicated reply address");
            }
        }
    }
}

/// Creates and releases reply addresses.
pub struct ReplyAddressManager {
    transport: Arc<dyn MessageTransport>,
    dispatcher: Arc<ReplyDispatcher>,
    /// Per-session address, initialised at most once per session.
    sessions: DashMap<SessionId, Arc<OnceCell<ActiveAddress>>>,
    /// Destinations created so far.
    allocations: AtomicU64,
}

impl ReplyAddressManager {
    /// Create a manager subscribing every address to `dispatcher`.
    pub fn new(transport: Arc<dyn MessageTransport>, dispatcher: Arc<ReplyDispatcher>) -> Self {
        Self {
            transport,
            dispatcher,
            sessions: DashMap::new(),
            allocations: AtomicU64::new(0),
        }
    }

    /// Get the session's reply address, creating it on first use.
    ///
    /// A failed allocation leaves the session without an address, so the
    /// next call retries. If the session is released while its address is
    /// still being created, the new address is torn down and the call fails
    /// with [`TransportError::Closed`].
    pub async fn acquire(&self, session: &SessionId) -> Result<ReplyAddress, TransportError> {
        let cell = Arc::clone(self.sessions.entry(*session).or_default().value());
        let active = cell.get_or_try_init(|| self.allocate(session)).await?;

        if !self.is_tracked(session, &cell) {
            debug!(
                session = %session,
                destination = %active.address.destination,
                "Session released during reply address creation"
            );
            active.subscription.cancel();
            delete_destination(self.transport.as_ref(), &active.address.destination).await?;
            return Err(TransportError::Closed);
        }
        Ok(active.address.clone())
    }

    /// Release an address obtained from [`acquire`](Self::acquire).
    ///
    /// Silent if the address was already released or the transport no
    /// longer knows it.
    pub async fn release(&self, address: &ReplyAddress) -> Result<(), TransportError> {
        let removed = self.sessions.remove_if(&address.session, |_, cell| {
            cell.get()
                .is_some_and(|active| active.address.destination == address.destination)
        });

        let Some((_, cell)) = removed else {
            debug!(
                session = %address.session,
                destination = %address.destination,
                "Reply address already released"
            );
            return Ok(());
        };

        if let Some(active) = cell.get() {
            active.subscription.cancel();
        }
        delete_destination(self.transport.as_ref(), &address.destination).await
    }

    /// Release whatever address `session` holds.
    ///
    /// An address still being created is torn down by the `acquire` that
    /// creates it.
    pub async fn release_session(&self, session: &SessionId) -> Result<(), TransportError> {
        match self.address_for(session) {
            Some(address) => self.release(&address).await,
            None => {
                self.sessions.remove(session);
                Ok(())
            }
        }
    }

    /// Create an address for a single request.
    pub async fn acquire_dedicated(
        &self,
        session: &SessionId,
    ) -> Result<DedicatedReplyAddress, TransportError> {
        let active = self.allocate(session).await?;
        Ok(DedicatedReplyAddress {
            destination: active.address.destination.clone(),
            active: Some(active),
            transport: Arc::clone(&self.transport),
        })
    }

    /// Release a per-request address.
    pub async fn release_dedicated(
        &self,
        dedicated: DedicatedReplyAddress,
    ) -> Result<(), TransportError> {
        dedicated.release().await
    }

    /// Current address of a session, if one has been created.
    pub fn address_for(&self, session: &SessionId) -> Option<ReplyAddress> {
        self.sessions
            .get(session)
            .and_then(|cell| cell.get().map(|active| active.address.clone()))
    }

    /// Number of destinations created so far (both modes).
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of sessions currently holding an address.
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    fn is_tracked(&self, session: &SessionId, cell: &Arc<OnceCell<ActiveAddress>>) -> bool {
        self.sessions
            .get(session)
            .is_some_and(|current| Arc::ptr_eq(current.value(), cell))
    }

    async fn allocate(&self, session: &SessionId) -> Result<ActiveAddress, TransportError> {
        let destination = self.transport.create_ephemeral_destination(session).await?;

        let subscription = match self
            .transport
            .subscribe(&destination, self.dispatcher.callback())
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(
                    session = %session,
                    destination = %destination,
                    error = %err,
                    "Failed to subscribe to reply address"
                );
                if let Err(cleanup) = self.transport.delete_ephemeral_destination(&destination).await {
                    debug!(destination = %destination, error = %cleanup, "Cleanup after failed subscribe");
                }
                return Err(err);
            }
        };

        self.allocations.fetch_add(1, Ordering::Relaxed);
        debug!(session = %session, destination = %destination, "Reply address allocated");

        Ok(ActiveAddress {
            address: ReplyAddress {
                session: *session,
                destination,
            },
            subscription,
        })
    }
}

/// Delete a reply destination, treating "already gone" as success.
async fn delete_destination(
    transport: &dyn MessageTransport,
    destination: &Destination,
) -> Result<(), TransportError> {
    match transport.delete_ephemeral_destination(destination).await {
        Ok(()) => {
            debug!(destination = %destination, "Reply address released");
            Ok(())
        }
        Err(TransportError::DestinationNotFound(_)) => {
            debug!(destination = %destination, "Reply address already gone");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
