//! # Broker Telemetry
//!
//! Logging and metrics for the broker samples.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an `EnvFilter`, pretty or JSON
//! - **Metrics**: Prometheus counters, gauges and histograms owned by
//!   [`MessagingMetrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_telemetry::{init_logging, MessagingMetrics, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! let metrics = MessagingMetrics::new()?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BROKER_SERVICE_NAME` | `broker-samples` | Service name in log lines |
//! | `BROKER_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `BROKER_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `BROKER_JSON_LOGS` | `false` (`true` in containers) | JSON formatted logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{HistogramTimer, MessagingMetrics};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Failed to encode metrics: {0}")]
    MetricsEncode(String),
}

/// Structured log entry tagged with the emitting component.
///
/// # Example
///
/// ```rust,ignore
/// log_event!(info, "replier", "Replier started", source = %destination);
/// ```
#[macro_export]
macro_rules! log_event {
    (info, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    (warn, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    (error, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };

    (debug, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

/// Increment a counter, optionally by label values.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
