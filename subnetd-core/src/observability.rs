//! Observability infrastructure: tracing and metrics.
//!
//! Call [`init`] once at process startup before any other operation.

use crate::error::Result;
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable enabling the Prometheus exporter.
/// Set to a listen address such as `127.0.0.1:9477`.
const METRICS_ADDR_KEY: &str = "SUBNETD_METRICS_ADDR";

/// Initialize the global observability infrastructure.
///
/// # Panics
/// Panics if called more than once.
pub fn init() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_level(true))
        .init();

    // Metrics export is opt-in; the lease hook entry point is short-lived and
    // must not bind a listener.
    if let Ok(addr) = std::env::var(METRICS_ADDR_KEY) {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid {} address: {}", METRICS_ADDR_KEY, addr))?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        tracing::info!("Prometheus metrics exporter listening on {}", addr);
    }

    Ok(())
}
