//! # Request/Reply Integration Flows
//!
//! Client and replier talking through the in-memory broker.
//!
//! ## Flows Tested:
//!
//! 1. **Correlation**: every reply reaches exactly the request that caused it
//! 2. **Terminal states**: completed, timed out and cancelled are final
//! 3. **Reply address lifecycle**: shared per session, or one per request
//! 4. **Replier**: echoes the correlation string, drops requests without reply-to

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Instant};

    use shared_bus::{BrokerConfig, DeliveryCallback, InMemoryBroker, MessageTransport, Subscription};
    use shared_types::{DeliveryMode, Destination, Envelope, SessionId, TransportError};

    use mq_01_request_reply::{
        CorrelationId, PendingRequestTable, PendingState, Replier, ReplierSummary,
        ReplyAddressMode, ReplyOutcome, RequestError, RequestReplyClient, RequestReplyConfig,
    };

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    const REQUESTS: &str = "T/GettingStarted/requests";

    type ReplierTask = JoinHandle<Result<ReplierSummary, TransportError>>;

    fn source() -> Destination {
        Destination::topic(REQUESTS)
    }

    fn transport(broker: &InMemoryBroker) -> Arc<dyn MessageTransport> {
        Arc::new(broker.clone())
    }

    /// Start a replier applying `f` to every request payload.
    async fn spawn_replier(
        broker: &InMemoryBroker,
        f: fn(Bytes) -> Bytes,
    ) -> (watch::Sender<bool>, ReplierTask) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let replier = Replier::new(transport(broker), source());
        let task = tokio::spawn(async move { replier.serve_replies(f, stop_rx).await });
        wait_until(|| broker.subscriber_count(&source()) > 0).await;
        (stop_tx, task)
    }

    async fn stop_replier(stop: watch::Sender<bool>, task: ReplierTask) -> ReplierSummary {
        stop.send(true).unwrap();
        timeout(Duration::from_secs(1), task)
            .await
            .expect("replier did not stop")
            .expect("replier panicked")
            .expect("replier failed")
    }

    fn uppercase(payload: Bytes) -> Bytes {
        Bytes::from(payload.to_ascii_uppercase())
    }

    fn client(broker: &InMemoryBroker) -> RequestReplyClient {
        RequestReplyClient::new(transport(broker), source(), RequestReplyConfig::default())
            .unwrap()
    }

    /// Poll until `condition` holds, failing after one second.
    async fn wait_until(condition: impl Fn() -> bool) {
        timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Subscribe to the request topic without replying.
    async fn capture_requests(
        broker: &InMemoryBroker,
    ) -> (Subscription, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = broker
            .subscribe(
                &source(),
                Arc::new(move |envelope| {
                    let _ = tx.send(envelope);
                }),
            )
            .await
            .unwrap();
        (subscription, rx)
    }

    /// The in-memory broker, with temporary queues that take a while to create.
    struct SlowReplyAddresses {
        broker: InMemoryBroker,
        delay: Duration,
    }

    #[async_trait]
    impl MessageTransport for SlowReplyAddresses {
        async fn publish(&self, d: &Destination, e: Envelope) -> Result<(), TransportError> {
            self.broker.publish(d, e).await
        }
        async fn create_ephemeral_destination(
            &self,
            s: &SessionId,
        ) -> Result<Destination, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.broker.create_ephemeral_destination(s).await
        }
        async fn delete_ephemeral_destination(&self, d: &Destination) -> Result<(), TransportError> {
            self.broker.delete_ephemeral_destination(d).await
        }
        async fn subscribe(
            &self,
            d: &Destination,
            cb: DeliveryCallback,
        ) -> Result<Subscription, TransportError> {
            self.broker.subscribe(d, cb).await
        }
    }

    // =============================================================================
    // PENDING TABLE: TERMINAL STATES
    // =============================================================================

    /// Exactly one of complete/expire/cancel wins, and the waiter sees that one.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_once_completion_under_contention() {
        for _ in 0..200 {
            let table = Arc::new(PendingRequestTable::new());
            let token = CorrelationId::new();
            let waiter = table
                .register(token, Instant::now() + Duration::from_secs(5))
                .unwrap();

            let racers = vec![
                {
                    let table = Arc::clone(&table);
                    tokio::spawn(async move { (0, table.complete(&token, Bytes::from_static(b"r"))) })
                },
                {
                    let table = Arc::clone(&table);
                    tokio::spawn(async move { (1, table.expire(&token)) })
                },
                {
                    let table = Arc::clone(&table);
                    tokio::spawn(async move { (2, table.cancel(&token)) })
                },
            ];

            let mut winners = Vec::new();
            for racer in futures::future::join_all(racers).await {
                let (who, won) = racer.unwrap();
                if won {
                    winners.push(who);
                }
            }
            assert_eq!(winners.len(), 1, "exactly one transition must win");

            let outcome = waiter.wait().await;
            match winners[0] {
                0 => assert_eq!(outcome, ReplyOutcome::Completed(Bytes::from_static(b"r"))),
                1 => assert_eq!(outcome, ReplyOutcome::TimedOut),
                _ => assert_eq!(outcome, ReplyOutcome::Cancelled),
            }
            assert!(table.is_empty());
        }
    }

    /// A reply arriving after expiry is refused and never reaches the caller.
    #[tokio::test]
    async fn test_no_resurrection_after_expire() {
        let table = Arc::new(PendingRequestTable::new());
        let token = CorrelationId::new();
        let waiter = table
            .register(token, Instant::now() + Duration::from_secs(5))
            .unwrap();

        assert!(table.expire(&token));
        assert!(!table.complete(&token, Bytes::from_static(b"late")));
        assert_eq!(table.state(&token), Some(PendingState::TimedOut));
        assert_eq!(waiter.wait().await, ReplyOutcome::TimedOut);
        assert!(!table.contains(&token));
    }

    // =============================================================================
    // CLIENT <-> REPLIER ROUND TRIPS
    // =============================================================================

    /// Property: request(P) against an echo replier returns f(P) in time.
    #[tokio::test]
    async fn test_round_trip_through_replier() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, uppercase).await;
        let client = client(&broker);

        let started = Instant::now();
        let reply = client
            .request(Bytes::from_static(b"sample request"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reply, Bytes::from_static(b"SAMPLE REQUEST"));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(client.pending_count(), 0);
        assert!(client.pending_table().is_empty());

        client.shutdown().await.unwrap();
        let summary = stop_replier(stop, task).await;
        assert_eq!(summary.handled, 1);
    }

    /// Property: a silent responder yields Timeout close to the deadline and
    /// leaves nothing behind.
    #[tokio::test]
    async fn test_timeout_against_silent_responder() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);

        let started = Instant::now();
        let err = client
            .request(Bytes::from_static(b"anyone?"), Duration::from_millis(50))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_timeout(), "expected timeout, got {err:?}");
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
        assert!(client.pending_table().is_empty());
        assert_eq!(client.pending_stats().timed_out, 1);
    }

    /// Property: a reply arriving after the timeout is only visible as an
    /// unmatched dispatch.
    #[tokio::test]
    async fn test_late_reply_is_unmatched() {
        let broker = InMemoryBroker::new();
        let (_subscription, mut requests) = capture_requests(&broker).await;
        let client = client(&broker);

        let err = client
            .request(Bytes::from_static(b"slow"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let request = requests.recv().await.unwrap();
        let reply_to = request.reply_to.clone().unwrap();
        broker
            .publish(&reply_to, Envelope::reply("too late", request.correlation_id))
            .await
            .unwrap();

        let stats = client.dispatch_stats();
        wait_until(|| stats.unmatched.load(Ordering::Relaxed) == 1).await;
        assert_eq!(stats.delivered.load(Ordering::Relaxed), 0);
        assert_eq!(client.pending_stats().completed, 0);
    }

    /// Property: a reply nobody asked for is dropped and the client keeps working.
    #[tokio::test]
    async fn test_unmatched_reply_dropped() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, uppercase).await;
        let client = client(&broker);

        client
            .request(Bytes::from_static(b"first"), Duration::from_secs(1))
            .await
            .unwrap();
        let address = client.reply_address().unwrap();

        broker
            .publish(
                &address.destination,
                Envelope::reply("stray", Some(CorrelationId::new().to_wire())),
            )
            .await
            .unwrap();
        broker
            .publish(&address.destination, Envelope::reply("no token", None))
            .await
            .unwrap();

        let stats = client.dispatch_stats();
        wait_until(|| stats.unmatched.load(Ordering::Relaxed) == 1).await;
        wait_until(|| stats.malformed.load(Ordering::Relaxed) == 1).await;

        let reply = client
            .request(Bytes::from_static(b"second"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"SECOND"));

        client.shutdown().await.unwrap();
        stop_replier(stop, task).await;
    }

    /// Property: concurrent requests on one session share one reply address
    /// and each gets its own reply.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_reply_address() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, uppercase).await;
        let client = Arc::new(client(&broker));

        let calls = (0..2).map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let payload = format!("request-{i}");
                let reply = client
                    .request(Bytes::from(payload.clone()), Duration::from_secs(2))
                    .await
                    .unwrap();
                (payload, reply)
            })
        });

        for result in futures::future::join_all(calls).await {
            let (payload, reply) = result.unwrap();
            assert_eq!(reply, Bytes::from(payload.to_ascii_uppercase()));
        }
        assert_eq!(client.reply_address_allocations(), 1);
        assert_eq!(broker.temporary_queue_count(), 1);

        client.shutdown().await.unwrap();
        assert_eq!(broker.temporary_queue_count(), 0);
        stop_replier(stop, task).await;
    }

    /// Fifty concurrent callers, each sees only its own reply.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_requests() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, |payload| payload).await;
        let client = Arc::new(client(&broker));

        let calls = (0..50).map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let payload = Bytes::from(format!("payload-{i}"));
                let reply = client.request(payload.clone(), Duration::from_secs(2)).await;
                (payload, reply)
            })
        });

        for result in futures::future::join_all(calls).await {
            let (payload, reply) = result.unwrap();
            assert_eq!(reply.unwrap(), payload);
        }
        assert_eq!(client.pending_stats().completed, 50);
        assert!(client.pending_table().is_empty());

        client.shutdown().await.unwrap();
        assert_eq!(stop_replier(stop, task).await.handled, 50);
    }

    // =============================================================================
    // TRANSPORT QUIRKS AND FAILURES
    // =============================================================================

    /// Brokers that decorate correlation ids with `ID:` still match.
    #[tokio::test]
    async fn test_prefixed_correlation_ids_match() {
        let broker = InMemoryBroker::with_config(BrokerConfig::default().with_correlation_prefix("ID:"));
        let (_subscription, mut requests) = capture_requests(&broker).await;
        let client = client(&broker);

        let pending = client
            .send_request(Bytes::from_static(b"ping"), Duration::from_secs(1))
            .await
            .unwrap();
        let request = requests.recv().await.unwrap();
        let raw = request.correlation_id.clone().unwrap();
        assert!(raw.starts_with("ID:"));

        // Replier echoes verbatim; the broker would not double-prefix.
        broker
            .publish(
                &request.reply_to.unwrap(),
                Envelope::reply("pong", Some(raw)),
            )
            .await
            .unwrap();

        assert_eq!(pending.wait().await.unwrap(), Bytes::from_static(b"pong"));
        assert_eq!(client.dispatch_stats().delivered.load(Ordering::Relaxed), 1);
    }

    /// A failed publish leaves no registration behind.
    #[tokio::test]
    async fn test_publish_failure_cancels_registration() {
        let broker = InMemoryBroker::new();
        let missing = Destination::TemporaryQueue("#P2P/QTMP/missing".to_string());
        let client =
            RequestReplyClient::new(transport(&broker), missing.clone(), RequestReplyConfig::default())
                .unwrap();

        let err = client
            .request(Bytes::from_static(b"lost"), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RequestError::Transport(TransportError::DestinationNotFound(missing))
        );
        assert!(client.pending_table().is_empty());
        assert_eq!(client.pending_stats().cancelled, 1);
    }

    /// Shutdown cancels in-flight requests and frees the reply address.
    #[tokio::test]
    async fn test_shutdown_cancels_in_flight() {
        let broker = InMemoryBroker::new();
        let client = client(&broker);

        let pending = client
            .send_request(Bytes::from_static(b"never answered"), Duration::from_secs(30))
            .await
            .unwrap();
        let token = pending.token();

        assert_eq!(client.shutdown().await.unwrap(), 1);
        assert_eq!(
            pending.wait().await.unwrap_err(),
            RequestError::Cancelled { token }
        );
        assert_eq!(broker.temporary_queue_count(), 0);
    }

    /// Shutdown while the first request is still creating the reply address.
    #[tokio::test]
    async fn test_shutdown_during_first_request() {
        let broker = InMemoryBroker::new();
        let transport = Arc::new(SlowReplyAddresses {
            broker: broker.clone(),
            delay: Duration::from_millis(50),
        });
        let client = Arc::new(
            RequestReplyClient::new(transport, source(), RequestReplyConfig::default()).unwrap(),
        );

        let request = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .request(Bytes::from_static(b"first"), Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(client.shutdown().await.unwrap(), 0);

        assert_eq!(
            request.await.unwrap().unwrap_err(),
            RequestError::Transport(TransportError::Closed)
        );
        assert!(client.reply_address().is_none());
        assert!(client.pending_table().is_empty());
        assert_eq!(broker.temporary_queue_count(), 0);
    }

    // =============================================================================
    // REPLY ADDRESS MODES
    // =============================================================================

    /// Per-request mode allocates and releases one destination per request.
    #[tokio::test]
    async fn test_per_request_reply_addresses() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, uppercase).await;
        let config =
            RequestReplyConfig::default().with_reply_address_mode(ReplyAddressMode::PerRequest);
        let client = RequestReplyClient::new(transport(&broker), source(), config).unwrap();

        for payload in ["a", "b", "c"] {
            let reply = client
                .request(Bytes::from(payload), Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(reply, Bytes::from(payload.to_ascii_uppercase()));
        }

        assert_eq!(client.reply_address_allocations(), 3);
        assert!(client.reply_address().is_none());
        assert_eq!(broker.temporary_queue_count(), 0);
        stop_replier(stop, task).await;
    }

    // =============================================================================
    // REPLIER BEHAVIOUR
    // =============================================================================

    /// Requests without reply-to are dropped; the loop keeps serving.
    #[tokio::test]
    async fn test_replier_drops_requests_without_reply_to() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, uppercase).await;

        broker
            .publish(&source(), Envelope::text("fire and forget"))
            .await
            .unwrap();

        let client = client(&broker);
        let reply = client
            .request(Bytes::from_static(b"real"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"REAL"));

        client.shutdown().await.unwrap();
        let summary = stop_replier(stop, task).await;
        assert_eq!(summary.dropped_without_reply_to, 1);
        assert_eq!(summary.handled, 1);
    }

    /// The reply echoes the request's correlation string and is non-persistent.
    #[tokio::test]
    async fn test_replier_echoes_correlation_verbatim() {
        let broker = InMemoryBroker::new();
        let (stop, task) = spawn_replier(&broker, uppercase).await;

        let inbox = broker
            .create_ephemeral_destination(&shared_types::SessionId::new())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = broker
            .subscribe(
                &inbox,
                Arc::new(move |envelope| {
                    let _ = tx.send(envelope);
                }),
            )
            .await
            .unwrap();

        let request = Envelope::request("hello", "ID:opaque-token", inbox.clone())
            .with_delivery_mode(DeliveryMode::Persistent);
        broker.publish(&source(), request).await.unwrap();

        let reply = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("ID:opaque-token"));
        assert_eq!(reply.payload, Bytes::from_static(b"HELLO"));
        assert_eq!(reply.delivery_mode, DeliveryMode::NonPersistent);
        assert!(reply.reply_to.is_none());

        stop_replier(stop, task).await;
    }
}
