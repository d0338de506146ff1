//! Prometheus exporter for parking occupancy data of the Konstanz open data platform.
//!
//! The exporter periodically pulls the parking guidance layer of the platform, converts the
//! records to metrics using [`parking_metrics`] and serves the latest values on `/metrics`.
//!
//! # Components
//!
//! - [`UpstreamClient`] fetches records from the platform. It implements [`RecordSource`], which
//!   can be mocked in tests.
//! - [`Refresher`] runs a single refresh cycle: fetch, transform, apply to the [`MetricStore`].
//!   A failed cycle is logged and leaves the store untouched.
//! - [`RefreshScheduler`] runs refresh cycles on a wall-clock aligned [`Schedule`]
//!   (by default, every 5 minutes 15 seconds past the mark).
//! - [`MetricsExporter`] serves the store contents over HTTP. Scrapes never trigger fetches.
//!
//! # Examples
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use parking_exporter::{
//!     ExporterConfig, MetricsExporter, RefreshScheduler, Refresher, UpstreamClient,
//! };
//! use parking_metrics::MetricStore;
//!
//! # async fn test() -> anyhow::Result<()> {
//! let config = ExporterConfig::default();
//! let store = Arc::new(MetricStore::new());
//! let client = UpstreamClient::new(config.upstream_url.clone(), config.request_timeout)?;
//! let refresher = Arc::new(Refresher::new(client, store.clone()));
//!
//! tokio::spawn(RefreshScheduler::new(refresher, config.schedule).run());
//! MetricsExporter::new(store).start(config.bind_address).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`MetricStore`]: parking_metrics::MetricStore

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::{
    config::{ConfigError, ExporterConfig},
    exporter::{MetricsExporter, MetricsServer, METRICS_PATH},
    refresh::Refresher,
    scheduler::{RefreshScheduler, Schedule},
    upstream::{FetchError, RecordSource, UpstreamClient, DEFAULT_UPSTREAM_URL},
};

mod config;
mod exporter;
mod refresh;
mod scheduler;
#[cfg(test)]
mod testonly;
mod upstream;
