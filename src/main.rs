//! Lotscope binary
//!
//! Loads configuration, connects to the RPC endpoint, assembles the
//! filter chain, runs the backward scan and reports the resulting lots.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, Level};

use lotscope::config::{ScanConfig, DEFAULT_CONFIG_PATH};
use lotscope::metrics::{serve_metrics, PrometheusScanMetrics};
use lotscope::{LotBook, Publisher, RpcClient, RpcConfig, Scanner};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config =
        ScanConfig::load(&path).with_context(|| format!("loading configuration from {path}"))?;

    let client = Arc::new(
        RpcClient::connect(RpcConfig::with_url(&config.rpc_url))
            .await
            .context("connecting to RPC endpoint")?,
    );

    let chain = config
        .build_filter_chain(client.clone())
        .context("assembling filter chain")?;
    info!(filters = chain.len(), mode = ?chain.mode(), "filter chain ready");

    let metrics = Arc::new(PrometheusScanMetrics::new().context("registering metrics")?);
    if let Some(addr) = config.metrics_addr {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, metrics).await {
                error!(error = %e, "metrics server stopped");
            }
        });
    }

    let mut book = LotBook::new(config.lot_policy);
    let scanner = Scanner::new(client, chain, metrics);
    let report = scanner.run(config.cutoff, &mut book).await?;

    info!(
        blocks = report.blocks_processed,
        txns = report.txns_processed,
        qualified = report.txns_qualified,
        lots = book.len(),
        "scan complete"
    );

    if let Some(url) = &config.redis_url {
        let redis_client = redis::Client::open(url.as_str()).context("opening Redis client")?;
        let connection = redis_client
            .get_multiplexed_async_connection()
            .await
            .context("connecting to Redis")?;
        let mut publisher = Publisher::new(connection, config.channel.clone());
        for lot in book.lots() {
            publisher.publish_lot(lot).await?;
        }
        info!(count = book.len(), channel = %config.channel, "published lot records");
    }

    Ok(())
}
