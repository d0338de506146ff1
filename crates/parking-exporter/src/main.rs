//! Entry point of the parking exporter.

use anyhow::Context as _;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use std::{future, sync::Arc};

use parking_exporter::{ExporterConfig, MetricsExporter, RefreshScheduler, Refresher, UpstreamClient};
use parking_metrics::MetricStore;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = ExporterConfig::from_env().context("Invalid exporter configuration")?;
    tracing::info!(?config, "Loaded exporter configuration");

    let store = Arc::new(MetricStore::new());
    let client = UpstreamClient::new(config.upstream_url.clone(), config.request_timeout)
        .context("Failed initializing upstream client")?;
    let refresher = Arc::new(Refresher::new(client, store.clone()));

    let (stop_sender, stop_receiver) = watch::channel(());
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "Failed listening to Ctrl+C signal; graceful shutdown is disabled");
            // Dropping the sender would stop the server.
            future::pending::<()>().await;
        }
        stop_sender.send_replace(());
    });

    let mut exporter = MetricsExporter::new(store);
    if let Some(format) = config.format {
        exporter = exporter.with_format(format);
    }
    let mut exporter_stop_receiver = stop_receiver.clone();
    let server = exporter
        .with_graceful_shutdown(async move {
            exporter_stop_receiver.changed().await.ok();
        })
        .bind(config.bind_address)
        .await
        .with_context(|| format!("Failed binding to `{}`", config.bind_address))?;
    tracing::info!(local_addr = %server.local_addr(), "Serving parking metrics");

    let mut scheduler_stop_receiver = stop_receiver;
    let scheduler = RefreshScheduler::new(refresher, config.schedule).with_graceful_shutdown(async move {
        scheduler_stop_receiver.changed().await.ok();
    });
    let scheduler_task = tokio::spawn(scheduler.run());

    server.start().await.context("Metrics server failed")?;
    scheduler_task.await.context("Refresh scheduler panicked")?;
    Ok(())
}
