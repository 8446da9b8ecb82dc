//! Request/Reply Client - the requesting side of the engine.
//!
//! One client is one session: it owns a pending table, a dispatcher and the
//! session's reply address. Any number of tasks may call [`request`] on the
//! same client concurrently; their replies share the reply address and are
//! told apart purely by correlation token.
//!
//! [`request`]: RequestReplyClient::request

use crate::adapters::dispatcher::{DispatchObserver, DispatchStats, ReplyDispatcher};
use crate::adapters::pending::{
    sweep_task, PendingRequestTable, PendingStatsSnapshot, ReplyOutcome, WaiterHandle,
};
use crate::adapters::reply_address::{DedicatedReplyAddress, ReplyAddress, ReplyAddressManager};
use crate::domain::config::{ReplyAddressMode, RequestReplyConfig};
use crate::domain::correlation::{CorrelationId, TokenGenerator, UuidTokenGenerator};
use crate::domain::error::{ConfigError, RequestError, RequestResult};
use crate::ports::inbound::RequestReplyApi;
use crate::ports::outbound::MessageTransport;
use async_trait::async_trait;
use bytes::Bytes;
use shared_types::{Destination, Envelope, SessionId, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A request that has been published and is waiting for its reply.
///
/// Dropping it without calling [`wait`](Self::wait) cancels the request.
#[derive(Debug)]
pub struct PendingReply {
    waiter: WaiterHandle,
    timeout: Duration,
    dedicated: Option<DedicatedReplyAddress>,
}

impl PendingReply {
    /// Correlation token of the request.
    pub fn token(&self) -> CorrelationId {
        self.waiter.token()
    }

    /// When the request times out.
    pub fn deadline(&self) -> Instant {
        self.waiter.deadline()
    }

    /// Suspend until the reply arrives, the deadline passes or the request
    /// is cancelled.
    pub async fn wait(self) -> RequestResult<Bytes> {
        let Self {
            waiter,
            timeout,
            dedicated,
        } = self;
        let token = waiter.token();
        let outcome = waiter.wait().await;

        if let Some(dedicated) = dedicated {
            if let Err(err) = dedicated.release().await {
                warn!(correlation_id = %token, error = %err, "Failed to release dedicated reply address");
            }
        }

        match outcome {
            ReplyOutcome::Completed(payload) => Ok(payload),
            ReplyOutcome::TimedOut => Err(RequestError::Timeout { token, timeout }),
            ReplyOutcome::Cancelled => Err(RequestError::Cancelled { token }),
        }
    }
}

/// Builder for [`RequestReplyClient`].
pub struct RequestReplyClientBuilder {
    transport: Arc<dyn MessageTransport>,
    target: Destination,
    config: RequestReplyConfig,
    session: SessionId,
    generator: Arc<dyn TokenGenerator>,
    observer: Option<DispatchObserver>,
}

impl RequestReplyClientBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: RequestReplyConfig) -> Self {
        self.config = config;
        self
    }

    /// Run under an explicit session id.
    #[must_use]
    pub fn session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// Replace the token generator.
    #[must_use]
    pub fn token_generator(mut self, generator: Arc<dyn TokenGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Observe every reply dispatch outcome.
    #[must_use]
    pub fn dispatch_observer(mut self, observer: DispatchObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> Result<RequestReplyClient, ConfigError> {
        self.config.validate()?;

        let table = Arc::new(PendingRequestTable::new());
        let mut dispatcher = ReplyDispatcher::new(Arc::clone(&table), self.config.normalizer());
        if let Some(observer) = self.observer {
            dispatcher = dispatcher.with_observer(observer);
        }
        let dispatcher = Arc::new(dispatcher);
        let addresses = ReplyAddressManager::new(Arc::clone(&self.transport), Arc::clone(&dispatcher));

        debug!(
            session = %self.session,
            target = %self.target,
            mode = ?self.config.reply_address_mode,
            "Request/reply client created"
        );

        Ok(RequestReplyClient {
            config: self.config,
            session: self.session,
            target: self.target,
            transport: self.transport,
            table,
            dispatcher,
            addresses,
            generator: self.generator,
        })
    }
}

/// Requesting side of the engine.
pub struct RequestReplyClient {
    config: RequestReplyConfig,
    session: SessionId,
    target: Destination,
    transport: Arc<dyn MessageTransport>,
    table: Arc<PendingRequestTable>,
    dispatcher: Arc<ReplyDispatcher>,
    addresses: ReplyAddressManager,
    generator: Arc<dyn TokenGenerator>,
}

impl RequestReplyClient {
    /// Client sending requests to `target` with the given configuration.
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        target: Destination,
        config: RequestReplyConfig,
    ) -> Result<Self, ConfigError> {
        Self::builder(transport, target).config(config).build()
    }

    /// Start building a client sending requests to `target`.
    pub fn builder(
        transport: Arc<dyn MessageTransport>,
        target: Destination,
    ) -> RequestReplyClientBuilder {
        RequestReplyClientBuilder {
            transport,
            target,
            config: RequestReplyConfig::default(),
            session: SessionId::new(),
            generator: Arc::new(UuidTokenGenerator),
            observer: None,
        }
    }

    /// Send `payload` and wait up to `timeout` for the correlated reply.
    pub async fn request(&self, payload: impl Into<Bytes>, timeout: Duration) -> RequestResult<Bytes> {
        self.send_request(payload, timeout).await?.wait().await
    }

    /// [`request`](Self::request) with the configured default timeout.
    pub async fn request_with_default_timeout(
        &self,
        payload: impl Into<Bytes>,
    ) -> RequestResult<Bytes> {
        self.request(payload, self.config.default_timeout).await
    }

    /// Publish a request and return a handle to wait on.
    ///
    /// The timeout runs from registration, not from the call to
    /// [`PendingReply::wait`].
    pub async fn send_request(
        &self,
        payload: impl Into<Bytes>,
        timeout: Duration,
    ) -> RequestResult<PendingReply> {
        let token = self.generator.next_token();

        let (reply_to, dedicated) = match self.config.reply_address_mode {
            ReplyAddressMode::PerSession => {
                let address = self.addresses.acquire(&self.session).await?;
                (address.destination, None)
            }
            ReplyAddressMode::PerRequest => {
                let dedicated = self.addresses.acquire_dedicated(&self.session).await?;
                (dedicated.destination().clone(), Some(dedicated))
            }
        };

        let waiter = match self.table.register(token, deadline_after(timeout)) {
            Ok(waiter) => waiter,
            Err(err) => {
                release_quietly(dedicated).await;
                return Err(err.into());
            }
        };

        let envelope = Envelope::request(payload, token.to_wire(), reply_to.clone())
            .with_delivery_mode(self.config.request_delivery_mode);

        if let Err(err) = self.transport.publish(&self.target, envelope).await {
            warn!(
                correlation_id = %token,
                target = %self.target,
                error = %err,
                "Request publish failed"
            );
            self.table.cancel(&token);
            drop(waiter);
            release_quietly(dedicated).await;
            return Err(err.into());
        }

        debug!(
            correlation_id = %token,
            target = %self.target,
            reply_to = %reply_to,
            timeout_ms = timeout.as_millis() as u64,
            "Request sent"
        );

        Ok(PendingReply {
            waiter,
            timeout,
            dedicated,
        })
    }

    /// Cancel an outstanding request. Returns false if it already finished.
    pub fn cancel(&self, token: &CorrelationId) -> bool {
        self.table.cancel(token)
    }

    /// Cancel everything pending and release the session's reply address.
    ///
    /// Returns the number of requests cancelled.
    pub async fn shutdown(&self) -> Result<usize, TransportError> {
        let cancelled = self.table.cancel_all();
        self.addresses.release_session(&self.session).await?;
        info!(
            session = %self.session,
            cancelled = cancelled,
            "Request/reply client shut down"
        );
        Ok(cancelled)
    }

    /// Spawn the background task expiring overdue requests.
    pub fn spawn_deadline_sweeper(&self) -> JoinHandle<()> {
        tokio::spawn(sweep_task(Arc::clone(&self.table), self.config.sweep_interval))
    }

    /// Session this client runs under.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Destination requests are published to.
    pub fn target(&self) -> &Destination {
        &self.target
    }

    /// Client configuration.
    pub fn config(&self) -> &RequestReplyConfig {
        &self.config
    }

    /// The session's shared reply address, once created.
    pub fn reply_address(&self) -> Option<ReplyAddress> {
        self.addresses.address_for(&self.session)
    }

    /// Reply destinations created so far.
    pub fn reply_address_allocations(&self) -> u64 {
        self.addresses.allocations()
    }

    /// Requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.table.pending_count()
    }

    /// Pending table counters.
    pub fn pending_stats(&self) -> PendingStatsSnapshot {
        self.table.stats().snapshot()
    }

    /// Dispatcher counters.
    pub fn dispatch_stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    /// The pending table (shared with the dispatcher).
    pub fn pending_table(&self) -> &Arc<PendingRequestTable> {
        &self.table
    }
}

#[async_trait]
impl RequestReplyApi for RequestReplyClient {
    async fn request(&self, payload: Bytes, timeout: Duration) -> RequestResult<Bytes> {
        RequestReplyClient::request(self, payload, timeout).await
    }

    fn cancel(&self, token: &CorrelationId) -> bool {
        RequestReplyClient::cancel(self, token)
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

async fn release_quietly(dedicated: Option<DedicatedReplyAddress>) {
    if let Some(dedicated) = dedicated {
        if let Err(err) = dedicated.release().await {
            debug!(error = %err, "Failed to release dedicated reply address");
        }
    }
}
