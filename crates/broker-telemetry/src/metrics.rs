//! Prometheus metrics for the messaging samples.
//!
//! All metrics follow the naming convention: `broker_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: request outcomes, reply dispatch results, messages moved
//! - **Gauge**: requests currently waiting for a reply
//! - **Histogram**: request round-trip latency

use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

/// Metrics for one process, registered in a registry it owns.
#[derive(Clone)]
pub struct MessagingMetrics {
    registry: Registry,

    /// Requests by outcome (completed/timeout/cancelled/transport_error/duplicate_token)
    pub requests: IntCounterVec,

    /// Request round trip duration
    pub request_duration: Histogram,

    /// Inbound replies by dispatch result (delivered/unmatched/malformed)
    pub replies_dispatched: IntCounterVec,

    /// Requests currently waiting for a reply
    pub pending_requests: IntGauge,

    /// Messages published by destination kind (topic/queue)
    pub messages_published: IntCounterVec,

    /// Messages received by destination kind (topic/queue)
    pub messages_received: IntCounterVec,
}

impl MessagingMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("broker_requests_total", "Requests by outcome"),
            &["outcome"],
        )
        .map_err(init_err)?;

        let request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "broker_request_duration_seconds",
                "Time from publishing a request to its terminal outcome",
            )
            .buckets(exponential_buckets(0.0005, 2.0, 15).map_err(init_err)?),
        )
        .map_err(init_err)?;

        let replies_dispatched = IntCounterVec::new(
            Opts::new("broker_replies_dispatched_total", "Inbound replies by dispatch result"),
            &["result"],
        )
        .map_err(init_err)?;

        let pending_requests = IntGauge::new(
            "broker_requests_pending",
            "Requests currently waiting for a reply",
        )
        .map_err(init_err)?;

        let messages_published = IntCounterVec::new(
            Opts::new("broker_messages_published_total", "Messages published"),
            &["kind"],
        )
        .map_err(init_err)?;

        let messages_received = IntCounterVec::new(
            Opts::new("broker_messages_received_total", "Messages received"),
            &["kind"],
        )
        .map_err(init_err)?;

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(requests.clone()),
            Box::new(request_duration.clone()),
            Box::new(replies_dispatched.clone()),
            Box::new(pending_requests.clone()),
            Box::new(messages_published.clone()),
            Box::new(messages_received.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(init_err)?;
        }

        Ok(Self {
            registry,
            requests,
            request_duration,
            replies_dispatched,
            pending_requests,
            messages_published,
            messages_received,
        })
    }

    /// Count one request outcome.
    pub fn record_request(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    /// Count one reply dispatch result.
    pub fn record_dispatch(&self, result: &str) {
        self.replies_dispatched.with_label_values(&[result]).inc();
    }

    /// Set the number of requests waiting for a reply.
    pub fn set_pending(&self, pending: usize) {
        self.pending_requests.set(pending as i64);
    }

    /// Count one published message.
    pub fn record_published(&self, kind: &str) {
        self.messages_published.with_label_values(&[kind]).inc();
    }

    /// Count one received message.
    pub fn record_received(&self, kind: &str) {
        self.messages_received.with_label_values(&[kind]).inc();
    }

    /// Time a request. Observation happens on drop.
    pub fn start_request_timer(&self) -> HistogramTimer {
        HistogramTimer::new(&self.request_duration)
    }

    /// The underlying registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| TelemetryError::MetricsEncode(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsEncode(e.to_string()))
    }
}

fn init_err(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
