//! # Broker Flow Tests
//!
//! The tutorial scenarios end to end, plus the destination semantics they
//! rely on (topic fan-out, queue competing consumers, temporary queues).

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use tokio::time::timeout;

    use broker_telemetry::MessagingMetrics;
    use mq_01_request_reply::{RequestReplyClient, RequestReplyConfig};
    use samples_runtime::scenarios::{self, PUBSUB_TEXT, QUEUE_TEXT, REPLY_TEXT};
    use samples_runtime::{SamplesConfig, SamplesRuntime, Scenario};
    use shared_bus::{DeliveryCallback, InMemoryBroker, MessageTransport};
    use shared_types::{DeliveryMode, Destination, Envelope, SessionId, TransportError};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn channel_callback() -> (DeliveryCallback, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: DeliveryCallback = Arc::new(move |envelope| {
            let _ = tx.send(envelope);
        });
        (callback, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
        timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timeout waiting for message")
            .expect("subscription closed")
    }

    // =============================================================================
    // TUTORIAL SCENARIOS
    // =============================================================================

    #[tokio::test]
    async fn test_runtime_runs_every_tutorial() {
        let runtime = SamplesRuntime::new(SamplesConfig::default()).unwrap();
        let report = runtime.run().await.unwrap();

        let request_reply = report.request_reply.unwrap();
        assert_eq!(request_reply.replies, vec![REPLY_TEXT.to_string()]);
        assert_eq!(report.pub_sub.unwrap().received, PUBSUB_TEXT);

        let queue = report.queue.unwrap();
        assert_eq!(queue.received, QUEUE_TEXT);
        assert_eq!(queue.delivery_mode, DeliveryMode::Persistent);

        let text = runtime.metrics().encode().unwrap();
        assert!(text.contains("broker_requests_total{outcome=\"completed\"} 1"));
        assert!(text.contains("broker_replies_dispatched_total{result=\"delivered\"} 1"));
        assert!(text.contains("broker_messages_received_total{kind=\"queue\"} 1"));
    }

    #[tokio::test]
    async fn test_request_to_unserved_topic_times_out() {
        let broker = InMemoryBroker::new();
        let client = RequestReplyClient::new(
            Arc::new(broker.clone()),
            Destination::topic("T/GettingStarted/nobody"),
            RequestReplyConfig::default(),
        )
        .unwrap();

        let err = client
            .request(Bytes::from_static(b"Sample Request"), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(scenarios::outcome_label(&Err(err)), "timeout");
        assert_eq!(broker.subscriber_count(&Destination::topic("T/GettingStarted/nobody")), 0);
    }

    #[tokio::test]
    async fn test_request_reply_scenario_concurrent_requests() {
        let broker = InMemoryBroker::new();
        let metrics = MessagingMetrics::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let config = SamplesConfig {
            scenario: Scenario::RequestReply,
            request_count: 10,
            ..SamplesConfig::default()
        };

        let report = scenarios::request_reply(&broker, &config, &metrics, rx)
            .await
            .unwrap();

        assert_eq!(report.replies.len(), 10);
        assert!(report.failures.is_empty());
        assert_eq!(report.replier.handled, 10);
        assert_eq!(metrics.requests.with_label_values(&["completed"]).get(), 10);
        assert_eq!(broker.temporary_queue_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_request_reply() {
        let broker = InMemoryBroker::new();
        let metrics = MessagingMetrics::new().unwrap();
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        // Shutdown already requested: the scenario stops waiting immediately.
        let config = SamplesConfig {
            reply_timeout: Duration::from_secs(30),
            ..SamplesConfig::default()
        };
        let report = scenarios::request_reply(&broker, &config, &metrics, rx)
            .await
            .unwrap();

        assert!(report.interrupted);
        assert!(report.replies.is_empty());
        assert_eq!(broker.temporary_queue_count(), 0);
    }

    // =============================================================================
    // DESTINATION SEMANTICS
    // =============================================================================

    #[tokio::test]
    async fn test_topic_fan_out() {
        let broker = InMemoryBroker::new();
        let topic = Destination::topic("T/GettingStarted/pubsub");

        let (first_cb, mut first) = channel_callback();
        let (second_cb, mut second) = channel_callback();
        let _a = broker.subscribe(&topic, first_cb).await.unwrap();
        let _b = broker.subscribe(&topic, second_cb).await.unwrap();

        broker.publish(&topic, Envelope::text("Hello world!")).await.unwrap();

        assert_eq!(next(&mut first).await.as_text(), Some("Hello world!"));
        assert_eq!(next(&mut second).await.as_text(), Some("Hello world!"));
    }

    #[tokio::test]
    async fn test_queue_competing_consumers() {
        let broker = InMemoryBroker::new();
        let queue = Destination::queue("Q/tutorial");

        let (first_cb, mut first) = channel_callback();
        let (second_cb, mut second) = channel_callback();
        let _a = broker.subscribe(&queue, first_cb).await.unwrap();
        let _b = broker.subscribe(&queue, second_cb).await.unwrap();

        for i in 0..4 {
            broker
                .publish(&queue, Envelope::text(format!("message-{i}")))
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        for _ in 0..2 {
            received.push(next(&mut first).await.as_text().unwrap().to_string());
            received.push(next(&mut second).await.as_text().unwrap().to_string());
        }
        received.sort();
        assert_eq!(received, vec!["message-0", "message-1", "message-2", "message-3"]);
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deleted_temporary_queue_rejects_publish() {
        let broker = InMemoryBroker::new();
        let destination = broker
            .create_ephemeral_destination(&SessionId::new())
            .await
            .unwrap();

        broker
            .delete_ephemeral_destination(&destination)
            .await
            .unwrap();

        assert_eq!(
            broker.publish(&destination, Envelope::text("gone")).await,
            Err(TransportError::DestinationNotFound(destination.clone()))
        );
        assert_eq!(broker.temporary_queue_count(), 0);
    }
}
