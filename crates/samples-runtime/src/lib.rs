//! # Samples Runtime
//!
//! Runs the messaging tutorials against one in-memory broker and collects
//! their metrics.
//!
//! ## Tutorials
//!
//! | Scenario | Destination | Payload |
//! |----------|-------------|---------|
//! | request-reply | `T/GettingStarted/requests` | `Sample Request` / `Sample response` |
//! | pubsub | `T/GettingStarted/pubsub` | `Hello world!` |
//! | queue | `Q/tutorial` | `Hello world Queues!` (persistent) |

#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod scenarios;

pub use config::{Scenario, SamplesConfig, SamplesConfigError};
pub use scenarios::{PubSubReport, QueueReport, RequestReplyReport};

use anyhow::{bail, Result};
use broker_telemetry::MessagingMetrics;
use shared_bus::InMemoryBroker;
use std::future::Future;
use tokio::sync::watch;
use tracing::{info, warn};

/// What a run produced, one entry per tutorial that ran.
#[derive(Debug, Default)]
pub struct RunReport {
    pub request_reply: Option<RequestReplyReport>,
    pub pub_sub: Option<PubSubReport>,
    pub queue: Option<QueueReport>,
}

/// Owns the broker, the metrics and the shutdown signal.
pub struct SamplesRuntime {
    config: SamplesConfig,
    broker: InMemoryBroker,
    metrics: MessagingMetrics,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SamplesRuntime {
    pub fn new(config: SamplesConfig) -> Result<Self> {
        let metrics = MessagingMetrics::new()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            broker: InMemoryBroker::new(),
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Run the configured tutorials in order: request/reply, pub/sub, queue.
    pub async fn run(&self) -> Result<RunReport> {
        if self.is_shutting_down() {
            bail!("Runtime is shut down");
        }
        let scenario = self.config.scenario;
        info!(scenario = %scenario, "Running samples");

        let mut report = RunReport::default();

        if scenario.includes(Scenario::RequestReply) {
            report.request_reply = Some(
                scenarios::request_reply(
                    &self.broker,
                    &self.config,
                    &self.metrics,
                    self.shutdown_rx.clone(),
                )
                .await?,
            );
        }
        if self.is_shutting_down() {
            return Ok(report);
        }

        if scenario.includes(Scenario::PubSub) {
            report.pub_sub =
                Some(scenarios::pub_sub(&self.broker, &self.config, &self.metrics).await?);
        }
        if scenario.includes(Scenario::Queue) {
            report.queue = Some(scenarios::queue(&self.broker, &self.config, &self.metrics).await?);
        }

        info!(
            messages_published = self.broker.messages_published(),
            "Samples finished"
        );
        Ok(report)
    }

    /// [`run`](Self::run) until it finishes or `signal` resolves.
    ///
    /// On the signal the runtime shuts down and the tutorial in progress is
    /// awaited, so it reports what it got instead of being dropped.
    pub async fn run_until<F>(&self, signal: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            biased;
            result = &mut run => result,
            () = signal => {
                warn!("Shutdown signal received");
                self.shutdown();
                run.await
            }
        }
    }

    /// Signal running tutorials to stop and close the broker.
    pub fn shutdown(&self) {
        info!("Initiating shutdown");
        let _ = self.shutdown_tx.send(true);
        self.broker.close();
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub fn config(&self) -> &SamplesConfig {
        &self.config
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn metrics(&self) -> &MessagingMetrics {
        &self.metrics
    }
}
