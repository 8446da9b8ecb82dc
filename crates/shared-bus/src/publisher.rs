//! # Transport Port and In-Memory Broker
//!
//! Defines the publishing side of the transport and the broker that backs it.

use crate::config::BrokerConfig;
use crate::subscriber::{invoke, DeliveryCallback, Subscription};
use crate::TEMPORARY_QUEUE_PREFIX;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{Destination, Envelope, SessionId, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Trait for talking to a message broker.
///
/// This is the only surface the request/reply engine and the samples use.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Publish an envelope to a destination.
    ///
    /// # Errors
    ///
    /// - `TransportError::DestinationNotFound` - temporary queue does not exist
    /// - `TransportError::QueueFull` - queue backlog limit reached
    /// - `TransportError::Closed` - transport shut down
    async fn publish(
        &self,
        destination: &Destination,
        envelope: Envelope,
    ) -> Result<(), TransportError>;

    /// Allocate a temporary destination owned by `session`.
    async fn create_ephemeral_destination(
        &self,
        session: &SessionId,
    ) -> Result<Destination, TransportError>;

    /// Release a temporary destination.
    ///
    /// # Errors
    ///
    /// `TransportError::DestinationNotFound` if it is already gone.
    async fn delete_ephemeral_destination(
        &self,
        destination: &Destination,
    ) -> Result<(), TransportError>;

    /// Start delivering messages on `destination` to `on_delivery`.
    async fn subscribe(
        &self,
        destination: &Destination,
        on_delivery: DeliveryCallback,
    ) -> Result<Subscription, TransportError>;
}

/// In-memory implementation of the transport.
///
/// Topics use `tokio::sync::broadcast` for fan-out. Queues hand each message
/// to one consumer, round-robin, and keep a backlog while nobody consumes.
/// Cloning is cheap and yields a handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    /// Broker settings.
    config: BrokerConfig,

    /// Broadcast sender per topic name.
    topics: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,

    /// Durable and temporary queues.
    queues: Mutex<HashMap<Destination, QueueState>>,

    /// Total envelopes accepted by `publish`.
    messages_published: AtomicU64,

    /// Set by `close()`.
    closed: AtomicBool,
}

struct QueueConsumer {
    id: Uuid,
    sender: mpsc::UnboundedSender<Envelope>,
}

struct QueueState {
    consumers: Vec<QueueConsumer>,
    backlog: VecDeque<Envelope>,
    next_consumer: usize,
    /// Owning session for temporary queues.
    owner: Option<SessionId>,
}

impl QueueState {
    fn durable() -> Self {
        Self {
            consumers: Vec::new(),
            backlog: VecDeque::new(),
            next_consumer: 0,
            owner: None,
        }
    }

    fn temporary(owner: SessionId) -> Self {
        Self {
            owner: Some(owner),
            ..Self::durable()
        }
    }

    /// Hand the envelope to the next live consumer.
    ///
    /// Returns the envelope back if no consumer took it.
    fn dispatch(&mut self, mut envelope: Envelope) -> Option<Envelope> {
        while !self.consumers.is_empty() {
            let idx = self.next_consumer % self.consumers.len();
            match self.consumers[idx].sender.send(envelope) {
                Ok(()) => {
                    self.next_consumer = idx + 1;
                    return None;
                }
                Err(mpsc::error::SendError(returned)) => {
                    // Consumer task is gone
                    self.consumers.remove(idx);
                    envelope = returned;
                }
            }
        }
        Some(envelope)
    }
}

impl InMemoryBroker {
    /// Create a broker with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(BrokerConfig::default())
    }

    /// Create a broker with explicit settings.
    #[must_use]
    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                topics: RwLock::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                messages_published: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Broker settings.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Total envelopes accepted by `publish`.
    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.inner.messages_published.load(Ordering::Relaxed)
    }

    /// Number of live subscribers on a destination.
    #[must_use]
    pub fn subscriber_count(&self, destination: &Destination) -> usize {
        match destination {
            Destination::Topic(name) => self
                .inner
                .topics
                .read()
                .get(name)
                .map_or(0, broadcast::Sender::receiver_count),
            _ => self
                .inner
                .queues
                .lock()
                .get(destination)
                .map_or(0, |queue| queue.consumers.len()),
        }
    }

    /// Messages waiting in a queue's backlog.
    #[must_use]
    pub fn queue_depth(&self, destination: &Destination) -> usize {
        self.inner
            .queues
            .lock()
            .get(destination)
            .map_or(0, |queue| queue.backlog.len())
    }

    /// Returns true if the queue (durable or temporary) exists.
    #[must_use]
    pub fn queue_exists(&self, destination: &Destination) -> bool {
        self.inner.queues.lock().contains_key(destination)
    }

    /// Number of temporary queues currently allocated.
    #[must_use]
    pub fn temporary_queue_count(&self) -> usize {
        self.inner
            .queues
            .lock()
            .keys()
            .filter(|destination| destination.is_temporary())
            .count()
    }

    /// Shut the broker down. Subsequent operations fail with `Closed`;
    /// active subscriptions stop receiving.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.topics.write().clear();
        self.inner.queues.lock().clear();
        debug!("In-memory broker closed");
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn decorate(&self, mut envelope: Envelope) -> Envelope {
        if let (Some(prefix), Some(id)) = (
            self.inner.config.correlation_prefix.as_deref(),
            envelope.correlation_id.as_mut(),
        ) {
            if !id.starts_with(prefix) {
                id.insert_str(0, prefix);
            }
        }
        envelope
    }

    fn publish_to_topic(&self, name: &str, envelope: Envelope) {
        let topics = self.inner.topics.read();
        let Some(sender) = topics.get(name) else {
            debug!(topic = name, "Message dropped (topic has no subscribers)");
            return;
        };

        match sender.send(envelope) {
            Ok(receivers) => {
                debug!(topic = name, receivers = receivers, "Message published");
            }
            Err(_) => {
                debug!(topic = name, "Message dropped (topic has no subscribers)");
            }
        }
    }

    fn publish_to_queue(
        &self,
        destination: &Destination,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        let mut queues = self.inner.queues.lock();
        let queue = match destination {
            Destination::TemporaryQueue(_) => queues
                .get_mut(destination)
                .ok_or_else(|| TransportError::DestinationNotFound(destination.clone()))?,
            _ => queues
                .entry(destination.clone())
                .or_insert_with(QueueState::durable),
        };

        let Some(undelivered) = queue.dispatch(envelope) else {
            debug!(queue = %destination, "Message delivered to consumer");
            return Ok(());
        };

        let capacity = self.inner.config.queue_backlog_limit;
        if queue.backlog.len() >= capacity {
            warn!(queue = %destination, capacity = capacity, "Queue backlog full, message rejected");
            return Err(TransportError::QueueFull {
                destination: destination.clone(),
                capacity,
            });
        }
        queue.backlog.push_back(undelivered);
        debug!(queue = %destination, depth = queue.backlog.len(), "Message queued (no consumer)");
        Ok(())
    }

    fn subscribe_topic(
        &self,
        destination: &Destination,
        name: &str,
        on_delivery: DeliveryCallback,
    ) -> Subscription {
        let mut receiver = {
            let mut topics = self.inner.topics.write();
            topics
                .entry(name.to_string())
                .or_insert_with(|| broadcast::channel(self.inner.config.channel_capacity).0)
                .subscribe()
        };

        let topic = destination.clone();
        let worker = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => invoke(&on_delivery, envelope, &topic),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        debug!(topic = %topic, lagged = count, "Subscriber lagged, some messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        debug!(topic = name, "New topic subscription created");
        Subscription::new(destination.clone(), move || worker.abort())
    }

    fn subscribe_queue(
        &self,
        destination: &Destination,
        on_delivery: DeliveryCallback,
    ) -> Result<Subscription, TransportError> {
        let id = Uuid::new_v4();
        let (sender, mut receiver) = mpsc::unbounded_channel();

        {
            let mut queues = self.inner.queues.lock();
            let queue = match destination {
                Destination::TemporaryQueue(_) => queues
                    .get_mut(destination)
                    .ok_or_else(|| TransportError::DestinationNotFound(destination.clone()))?,
                _ => queues
                    .entry(destination.clone())
                    .or_insert_with(QueueState::durable),
            };

            // Drain anything that arrived before the first consumer
            while let Some(envelope) = queue.backlog.pop_front() {
                if sender.send(envelope).is_err() {
                    break;
                }
            }
            queue.consumers.push(QueueConsumer { id, sender });
        }

        let queue_name = destination.clone();
        let worker = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                invoke(&on_delivery, envelope, &queue_name);
            }
        });

        let broker: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        let key = destination.clone();
        debug!(queue = %destination, "New queue consumer attached");
        Ok(Subscription::with_id(id, destination.clone(), move || {
            worker.abort();
            if let Some(broker) = broker.upgrade() {
                if let Some(queue) = broker.queues.lock().get_mut(&key) {
                    queue.consumers.retain(|consumer| consumer.id != id);
                }
            }
        }))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageTransport for InMemoryBroker {
    async fn publish(
        &self,
        destination: &Destination,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let envelope = self.decorate(envelope);

        match destination {
            Destination::Topic(name) => self.publish_to_topic(name, envelope),
            Destination::Queue(_) | Destination::TemporaryQueue(_) => {
                self.publish_to_queue(destination, envelope)?;
            }
        }

        self.inner.messages_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn create_ephemeral_destination(
        &self,
        session: &SessionId,
    ) -> Result<Destination, TransportError> {
        self.ensure_open()?;
        let destination = Destination::TemporaryQueue(format!(
            "{}/{}/{}",
            TEMPORARY_QUEUE_PREFIX,
            session,
            Uuid::new_v4().simple()
        ));

        self.inner
            .queues
            .lock()
            .insert(destination.clone(), QueueState::temporary(*session));

        debug!(session = %session, destination = %destination, "Temporary queue created");
        Ok(destination)
    }

    async fn delete_ephemeral_destination(
        &self,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        if !destination.is_temporary() {
            return Err(TransportError::DestinationNotFound(destination.clone()));
        }

        // Dropping the queue state drops the consumer senders, which ends
        // their delivery tasks.
        let removed = self.inner.queues.lock().remove(destination);
        match removed {
            Some(queue) => {
                debug!(
                    destination = %destination,
                    owner = ?queue.owner,
                    discarded = queue.backlog.len(),
                    "Temporary queue deleted"
                );
                Ok(())
            }
            None => Err(TransportError::DestinationNotFound(destination.clone())),
        }
    }

    async fn subscribe(
        &self,
        destination: &Destination,
        on_delivery: DeliveryCallback,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        match destination {
            Destination::Topic(name) => Ok(self.subscribe_topic(destination, name, on_delivery)),
            Destination::Queue(_) | Destination::TemporaryQueue(_) => {
                self.subscribe_queue(destination, on_delivery)
            }
        }
    }
}
