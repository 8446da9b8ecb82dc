//! # Correlation Engine Benchmarks
//!
//! Hot paths of a request/reply exchange:
//! - Token generation and normalization (every request / every reply)
//! - Register + complete on the pending table
//! - Full round trip through the in-memory broker
//!
//! Conditions:
//! - Tables already holding thousands of pending entries
//! - Broker-decorated (`ID:`) tokens

use bytes::Bytes;
use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use mq_01_request_reply::{
    CorrelationId, PendingRequestTable, Replier, RequestReplyClient, RequestReplyConfig,
    TokenGenerator, TokenNormalizer, UuidTokenGenerator,
};
use shared_bus::{InMemoryBroker, MessageTransport};
use shared_types::Destination;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::time::Instant;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("benchmark runtime")
}

pub fn bench_tokens(c: &mut Criterion) {
    let mut group = c.benchmark_group("mq-01/tokens");
    let generator = UuidTokenGenerator;
    let normalizer = TokenNormalizer::default();
    let plain = CorrelationId::new().to_wire();
    let decorated = format!("ID:{}", plain);

    group.bench_function("generate", |b| b.iter(|| black_box(generator.next_token())));
    group.bench_function("normalize_plain", |b| {
        b.iter(|| black_box(normalizer.normalize(black_box(&plain))))
    });
    group.bench_function("normalize_prefixed", |b| {
        b.iter(|| black_box(normalizer.normalize(black_box(&decorated))))
    });
    group.finish();
}

pub fn bench_pending_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("mq-01/pending_table");

    for backlog in [0usize, 1_000, 10_000] {
        let table = Arc::new(PendingRequestTable::new());
        let deadline = Instant::now() + Duration::from_secs(3600);
        let _held: Vec<_> = (0..backlog)
            .map(|_| table.register(CorrelationId::new(), deadline).expect("register"))
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("register_complete", backlog),
            &backlog,
            |b, _| {
                b.iter(|| {
                    let token = CorrelationId::new();
                    let waiter = table.register(token, deadline).expect("register");
                    black_box(table.complete(&token, Bytes::from_static(b"reply")));
                    drop(waiter);
                })
            },
        );
    }
    group.finish();
}

pub fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("mq-01/round_trip");
    group.measurement_time(Duration::from_secs(10));
    let rt = runtime();

    let broker = InMemoryBroker::new();
    let transport: Arc<dyn MessageTransport> = Arc::new(broker.clone());
    let source = Destination::topic("T/GettingStarted/requests");
    let (stop_tx, stop_rx) = watch::channel(false);

    let replier = Replier::new(Arc::clone(&transport), source.clone());
    rt.spawn(async move { replier.serve_replies(|payload: Bytes| payload, stop_rx).await });
    rt.block_on(async {
        while broker.subscriber_count(&source) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let client = Arc::new(
        RequestReplyClient::new(transport, source, RequestReplyConfig::default())
            .expect("client"),
    );

    group.bench_function("single", |b| {
        b.iter(|| {
            rt.block_on(client.request(Bytes::from_static(b"Sample Request"), Duration::from_secs(1)))
                .expect("reply")
        })
    });

    for concurrency in [8usize, 64] {
        group.throughput(Throughput::Elements(concurrency as u64));
        group.bench_with_input(
            BenchmarkId::new("concurrent", concurrency),
            &concurrency,
            |b, &n| {
                b.iter(|| {
                    rt.block_on(async {
                        let calls = (0..n).map(|_| {
                            client.request(Bytes::from_static(b"Sample Request"), Duration::from_secs(1))
                        });
                        for reply in futures::future::join_all(calls).await {
                            black_box(reply.expect("reply"));
                        }
                    })
                })
            },
        );
    }
    group.finish();

    let _ = stop_tx.send(true);
    let _ = rt.block_on(client.shutdown());
}
