//! # Subscriber Side
//!
//! Subscription handles and the callback type deliveries are pushed through.

use parking_lot::Mutex;
use shared_types::{Destination, Envelope};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Callback invoked by the transport for every delivery on a subscription.
///
/// Runs on a transport-owned task. Must not block.
pub type DeliveryCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

type Teardown = Box<dyn FnOnce() + Send>;

/// A subscription handle.
///
/// When cancelled or dropped, deliveries stop and the transport forgets the
/// subscriber.
pub struct Subscription {
    /// Unique id of this subscription.
    id: Uuid,

    /// Destination the subscription listens on.
    destination: Destination,

    /// Transport-provided cleanup, taken on first cancel.
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    /// Create a subscription whose cancellation runs `teardown` exactly once.
    pub fn new(destination: Destination, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self::with_id(Uuid::new_v4(), destination, teardown)
    }

    pub(crate) fn with_id(
        id: Uuid,
        destination: Destination,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            destination,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// Unique id of this subscription.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Destination this subscription listens on.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Returns true until the subscription has been cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.teardown.lock().is_some()
    }

    /// Stop deliveries. Idempotent.
    pub fn cancel(&self) {
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
            debug!(destination = %self.destination, subscription = %self.id, "Subscription cancelled");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Hand one envelope to a callback, containing any panic.
pub(crate) fn invoke(callback: &DeliveryCallback, envelope: Envelope, destination: &Destination) {
    let message_id = envelope.message_id;
    if catch_unwind(AssertUnwindSafe(|| callback(envelope))).is_err() {
        warn!(
            destination = %destination,
            message_id = %message_id,
            "Delivery callback panicked, message dropped"
        );
    }
}
