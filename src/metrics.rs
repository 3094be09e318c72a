//! Scan Metrics
//!
//! The scanner reports progress through a narrow injected trait instead of
//! a process-wide registry. The Prometheus implementation owns a private
//! registry with the scan's three collectors and renders the text
//! exposition format for a pull endpoint served as a background task.

use axum::http::header;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Number of transactions checked for lot qualification
pub const TXNS_PROCESSED: &str = "txns_processed";

/// Number of blocks where the full set of transactions has been checked
pub const BLOCKS_PROCESSED: &str = "blocks_processed";

/// The number of the last block fully processed
pub const LAST_BLOCK_COMPLETED: &str = "last_block_completed";

/// Progress counters and gauges reported by the scanner
pub trait ScanMetrics: Send + Sync {
    fn increment_counter(&self, name: &str);
    fn set_gauge(&self, name: &str, value: i64);
}

/// Metrics sink that discards everything
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl ScanMetrics for NoopMetrics {
    fn increment_counter(&self, _name: &str) {}
    fn set_gauge(&self, _name: &str, _value: i64) {}
}

/// Prometheus-backed metrics with a private registry
pub struct PrometheusScanMetrics {
    registry: Registry,
    counters: HashMap<&'static str, IntCounter>,
    gauges: HashMap<&'static str, IntGauge>,
}

impl PrometheusScanMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let txns = IntCounter::new(
            TXNS_PROCESSED,
            "Number of transactions checked for lot qualification",
        )?;
        let blocks = IntCounter::new(
            BLOCKS_PROCESSED,
            "Number of blocks where the full set of transactions has been checked for lot qualification",
        )?;
        let last_block = IntGauge::new(
            LAST_BLOCK_COMPLETED,
            "The number of the last block fully processed",
        )?;

        registry.register(Box::new(txns.clone()))?;
        registry.register(Box::new(blocks.clone()))?;
        registry.register(Box::new(last_block.clone()))?;

        let counters = HashMap::from([(TXNS_PROCESSED, txns), (BLOCKS_PROCESSED, blocks)]);
        let gauges = HashMap::from([(LAST_BLOCK_COMPLETED, last_block)]);

        Ok(Self {
            registry,
            counters,
            gauges,
        })
    }

    /// Current value of a counter, mainly for tests and summaries
    pub fn counter_value(&self, name: &str) -> Option<u64> {
        self.counters.get(name).map(|c| c.get())
    }

    /// Current value of a gauge
    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).map(|g| g.get())
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl ScanMetrics for PrometheusScanMetrics {
    fn increment_counter(&self, name: &str) {
        match self.counters.get(name) {
            Some(counter) => counter.inc(),
            None => warn!(name, "increment of unregistered counter"),
        }
    }

    fn set_gauge(&self, name: &str, value: i64) {
        match self.gauges.get(name) {
            Some(gauge) => gauge.set(value),
            None => warn!(name, "set of unregistered gauge"),
        }
    }
}

/// Serve `GET /metrics` until the listener fails or the task is dropped
pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<PrometheusScanMetrics>,
) -> std::io::Result<()> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = metrics.clone();
            async move {
                (
                    [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
                    metrics.render(),
                )
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "serving metrics");
    axum::serve(listener, app).await
}
