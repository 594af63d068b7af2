//! Logging and metrics exporter bootstrap shared by the binaries

use crate::config::ObservabilityConfig;
use crate::errors::{AppError, Result};
use crate::metrics::{self, EMBEDDING_BUCKETS, LATENCY_BUCKETS, METRICS_PREFIX};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    // try_init: tests and the CLI mode may initialise more than once
    let _ = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Start the Prometheus scrape endpoint and describe all metrics.
/// A `metrics_port` of 0 disables the exporter.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if config.metrics_port == 0 {
        tracing::info!("Metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(LATENCY_BUCKETS)
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
                EMBEDDING_BUCKETS,
            )
        })
        .and_then(|b| b.install())
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to start metrics exporter: {}", e),
        })?;

    metrics::register_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}
