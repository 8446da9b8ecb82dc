//! # Tutorials
//!
//! Each scenario wires producers and consumers against one broker and
//! reports what came back.
//!
//! ```text
//! request_reply:  client ──request──► T/GettingStarted/requests ──► replier
//!                   ▲                                                  │
//!                   └──────────── reply (temporary queue) ◄────────────┘
//!
//! pub_sub:        publisher ──► T/GettingStarted/pubsub ──► subscriber
//!
//! queue:          producer ──► Q/tutorial (backlog) ──► consumer
//! ```

use anyhow::{anyhow, Context, Result};
use broker_telemetry::{log_event, MessagingMetrics};
use bytes::Bytes;
use futures::future::join_all;
use mq_01_request_reply::{
    DispatchObserver, DispatchOutcome, Replier, ReplierSummary, RequestError, RequestReplyClient,
    RequestReplyConfig, RequestResult,
};
use shared_bus::{DeliveryMode, Destination, Envelope, InMemoryBroker, MessageTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::config::SamplesConfig;

/// Payload of each request.
pub const REQUEST_TEXT: &str = "Sample Request";

/// Payload of each reply.
pub const REPLY_TEXT: &str = "Sample response";

/// Payload of the publish/subscribe tutorial.
pub const PUBSUB_TEXT: &str = "Hello world!";

/// Payload of the queue tutorial.
pub const QUEUE_TEXT: &str = "Hello world Queues!";

const COMPONENT_REQUESTOR: &str = "requestor";
const COMPONENT_REPLIER: &str = "replier";
const COMPONENT_PUBLISHER: &str = "publisher";
const COMPONENT_SUBSCRIBER: &str = "subscriber";

/// How long a consumer waits for a single message.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the replier to attach to its source.
const REPLIER_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of the request/reply tutorial.
#[derive(Debug, Clone, Default)]
pub struct RequestReplyReport {
    /// Reply payloads, in request order.
    pub replies: Vec<String>,
    /// Requests that ended without a reply.
    pub failures: Vec<RequestError>,
    /// What the replier did.
    pub replier: ReplierSummary,
    /// Shutdown was requested before all replies arrived.
    pub interrupted: bool,
}

/// Result of the publish/subscribe tutorial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubReport {
    pub received: String,
}

/// Result of the queue tutorial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReport {
    pub received: String,
    pub delivery_mode: DeliveryMode,
    /// Messages waiting on the queue before the consumer attached.
    pub backlog_before_consume: usize,
}

/// Metric label for a request outcome.
pub fn outcome_label(result: &RequestResult<Bytes>) -> &'static str {
    match result {
        Ok(_) => "completed",
        Err(RequestError::Timeout { .. }) => "timeout",
        Err(RequestError::Cancelled { .. }) => "cancelled",
        Err(RequestError::Transport(_)) => "transport_error",
        Err(RequestError::DuplicateToken(_)) => "duplicate_token",
    }
}

/// Metric label for a destination.
pub fn destination_kind(destination: &Destination) -> &'static str {
    if destination.is_queue() {
        "queue"
    } else {
        "topic"
    }
}

/// Replier answering every request with [`REPLY_TEXT`], plus a client
/// sending `config.request_count` concurrent requests to it.
pub async fn request_reply(
    broker: &InMemoryBroker,
    config: &SamplesConfig,
    metrics: &MessagingMetrics,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RequestReplyReport> {
    let transport: Arc<dyn MessageTransport> = Arc::new(broker.clone());
    let source = Destination::topic(config.request_topic.as_str());

    let (stop_tx, stop_rx) = watch::channel(false);
    let replier = Replier::new(Arc::clone(&transport), source.clone());
    let replier_task = tokio::spawn(async move {
        let handler = |request: Bytes| {
            log_event!(
                info,
                COMPONENT_REPLIER,
                "Received request",
                payload = %String::from_utf8_lossy(&request)
            );
            Bytes::from_static(REPLY_TEXT.as_bytes())
        };
        replier.serve_replies(handler, stop_rx).await
    });
    tokio::select! {
        biased;
        _ = shutdown_requested(&mut shutdown) => {
            log_event!(warn, COMPONENT_REQUESTOR, "Interrupted before the replier was ready");
            replier_task.abort();
            return Ok(RequestReplyReport {
                interrupted: true,
                ..RequestReplyReport::default()
            });
        }
        ready = wait_for_subscriber(broker, &source) => ready?,
    }

    let observer_metrics = metrics.clone();
    let observer: DispatchObserver = Arc::new(move |outcome: DispatchOutcome| {
        observer_metrics.record_dispatch(outcome.as_str());
    });
    let client = RequestReplyClient::builder(Arc::clone(&transport), source.clone())
        .config(RequestReplyConfig::default().with_default_timeout(config.reply_timeout))
        .dispatch_observer(observer)
        .build()
        .context("Invalid request/reply configuration")?;
    let sweeper = client.spawn_deadline_sweeper();

    let requests = (0..config.request_count).map(|i| {
        let payload = if config.request_count == 1 {
            REQUEST_TEXT.to_string()
        } else {
            format!("{} #{}", REQUEST_TEXT, i + 1)
        };
        issue_request(&client, metrics, payload)
    });

    let mut report = RequestReplyReport::default();
    tokio::select! {
        results = join_all(requests) => {
            for result in results {
                match result {
                    Ok(reply) => report.replies.push(String::from_utf8_lossy(&reply).into_owned()),
                    Err(err) => report.failures.push(err),
                }
            }
        }
        _ = shutdown_requested(&mut shutdown) => {
            log_event!(warn, COMPONENT_REQUESTOR, "Interrupted while waiting for replies");
            report.interrupted = true;
        }
    }

    let cancelled = client.shutdown().await?;
    sweeper.abort();
    metrics.set_pending(client.pending_count());

    let _ = stop_tx.send(true);
    report.replier = replier_task.await.context("Replier task panicked")??;

    log_event!(
        info,
        COMPONENT_REQUESTOR,
        "Request/reply finished",
        replies = report.replies.len(),
        failures = report.failures.len(),
        cancelled = cancelled
    );
    Ok(report)
}

async fn issue_request(
    client: &RequestReplyClient,
    metrics: &MessagingMetrics,
    payload: String,
) -> RequestResult<Bytes> {
    let _timer = metrics.start_request_timer();
    let result = match client
        .send_request(payload, client.config().default_timeout)
        .await
    {
        Ok(pending) => {
            let token = pending.token();
            metrics.record_published(destination_kind(client.target()));
            metrics.set_pending(client.pending_count());
            log_event!(debug, COMPONENT_REQUESTOR, "Request sent", correlation_id = %token);

            let result = pending.wait().await;
            match &result {
                Ok(reply) => log_event!(
                    info,
                    COMPONENT_REQUESTOR,
                    "Received reply",
                    correlation_id = %token,
                    payload = %String::from_utf8_lossy(reply)
                ),
                Err(err) => log_event!(
                    warn,
                    COMPONENT_REQUESTOR,
                    "No reply",
                    correlation_id = %token,
                    error = %err
                ),
            }
            result
        }
        Err(err) => {
            log_event!(error, COMPONENT_REQUESTOR, "Request failed", error = %err);
            Err(err)
        }
    };

    metrics.record_request(outcome_label(&result));
    result
}

/// Resolves once `true` is observed. A dropped sender never resolves.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

async fn wait_for_subscriber(broker: &InMemoryBroker, destination: &Destination) -> Result<()> {
    timeout(REPLIER_READY_TIMEOUT, async {
        while broker.subscriber_count(destination) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("Nobody subscribed to {} within {:?}", destination, REPLIER_READY_TIMEOUT))
}

/// Subscriber on a topic, then one [`PUBSUB_TEXT`] publish.
pub async fn pub_sub(
    broker: &InMemoryBroker,
    config: &SamplesConfig,
    metrics: &MessagingMetrics,
) -> Result<PubSubReport> {
    let topic = Destination::topic(config.pubsub_topic.as_str());

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let subscription = broker
        .subscribe(
            &topic,
            Arc::new(move |envelope| {
                let _ = tx.send(envelope);
            }),
        )
        .await?;
    log_event!(info, COMPONENT_SUBSCRIBER, "Subscribed", destination = %topic);

    broker.publish(&topic, Envelope::text(PUBSUB_TEXT)).await?;
    metrics.record_published(destination_kind(&topic));
    log_event!(info, COMPONENT_PUBLISHER, "Message published", destination = %topic);

    let envelope = receive(&mut rx, &topic).await?;
    metrics.record_received(destination_kind(&topic));
    subscription.cancel();

    let received = envelope.as_text().unwrap_or_default().to_string();
    log_event!(info, COMPONENT_SUBSCRIBER, "Received message", payload = %received);
    Ok(PubSubReport { received })
}

/// Persistent send of [`QUEUE_TEXT`] to a queue nobody consumes yet, then a
/// consumer that picks it up from the backlog.
pub async fn queue(
    broker: &InMemoryBroker,
    config: &SamplesConfig,
    metrics: &MessagingMetrics,
) -> Result<QueueReport> {
    let queue = Destination::queue(config.queue_name.as_str());

    let message = Envelope::text(QUEUE_TEXT).with_delivery_mode(DeliveryMode::Persistent);
    broker.publish(&queue, message).await?;
    metrics.record_published(destination_kind(&queue));
    let backlog_before_consume = broker.queue_depth(&queue);
    log_event!(
        info,
        COMPONENT_PUBLISHER,
        "Message sent",
        destination = %queue,
        backlog = backlog_before_consume
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let subscription = broker
        .subscribe(
            &queue,
            Arc::new(move |envelope| {
                let _ = tx.send(envelope);
            }),
        )
        .await?;

    let envelope = receive(&mut rx, &queue).await?;
    metrics.record_received(destination_kind(&queue));
    subscription.cancel();

    let received = envelope.as_text().unwrap_or_default().to_string();
    log_event!(
        info,
        COMPONENT_SUBSCRIBER,
        "Received message",
        destination = %queue,
        payload = %received,
        delivery_mode = ?envelope.delivery_mode
    );
    Ok(QueueReport {
        received,
        delivery_mode: envelope.delivery_mode,
        backlog_before_consume,
    })
}

async fn receive(
    rx: &mut mpsc::UnboundedReceiver<Envelope>,
    destination: &Destination,
) -> Result<Envelope> {
    timeout(RECEIVE_TIMEOUT, rx.recv())
        .await
        .with_context(|| format!("No message on {} within {:?}", destination, RECEIVE_TIMEOUT))?
        .with_context(|| format!("Subscription to {} closed", destination))
}
