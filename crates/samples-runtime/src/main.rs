//! # Samples Runtime
//!
//! Entry point for the messaging tutorials.
//!
//! ## Usage
//!
//! ```bash
//! SAMPLES_SCENARIO=request-reply SAMPLES_REQUEST_COUNT=10 cargo run -p samples-runtime
//! ```

use anyhow::{Context, Result};
use broker_telemetry::{init_logging, TelemetryConfig};
use samples_runtime::{SamplesConfig, SamplesRuntime};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_logging(&telemetry).context("Failed to initialize logging")?;

    info!("===========================================");
    info!("  Messaging Samples v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");

    let config = SamplesConfig::from_env().context("Invalid samples configuration")?;
    let runtime = SamplesRuntime::new(config)?;

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => warn!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    match runtime.run_until(ctrl_c).await {
        Ok(report) => info!(
            request_reply = report.request_reply.is_some(),
            interrupted = report.request_reply.as_ref().is_some_and(|r| r.interrupted),
            pub_sub = report.pub_sub.is_some(),
            queue = report.queue.is_some(),
            "Samples finished"
        ),
        Err(e) => {
            error!("Samples failed: {:#}", e);
            runtime.shutdown();
            return Err(e);
        }
    }

    runtime.shutdown();
    println!("{}", runtime.metrics().encode()?);
    Ok(())
}
