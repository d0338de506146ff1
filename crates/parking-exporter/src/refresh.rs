//! Single refresh cycle: fetching upstream records and applying them to the metric store.

use tokio::sync::Mutex;

use std::{fmt, sync::Arc, time::Instant};

use parking_metrics::{transform, MetricStore};

use crate::upstream::{FetchError, RecordSource};

/// Runs refresh cycles against a [`MetricStore`].
///
/// Cycles are serialized: if a cycle is requested while another one is in progress, it waits
/// for the previous one to complete. Thus, the store never receives concurrent updates.
pub struct Refresher<S> {
    source: S,
    store: Arc<MetricStore>,
    cycle_lock: Mutex<()>,
}

impl<S> fmt::Debug for Refresher<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Refresher")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl<S: RecordSource> Refresher<S> {
    /// Creates a refresher fetching records from `source`.
    pub fn new(source: S, store: Arc<MetricStore>) -> Self {
        Self {
            source,
            store,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Runs a single refresh cycle. On success, returns the frame count after the update.
    ///
    /// # Errors
    ///
    /// Returns an error if fetching records fails. In this case, the store is not modified.
    /// The error is logged, so callers are free to ignore it.
    pub async fn refresh(&self) -> Result<u64, FetchError> {
        let _guard = self.cycle_lock.lock().await;
        tracing::debug!("Updating parking data from upstream");
        let started_at = Instant::now();

        let records = match self.source.fetch().await {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(
                    kind = err.kind(),
                    %err,
                    elapsed = ?started_at.elapsed(),
                    "Failed fetching parking data; keeping previous values"
                );
                return Err(err);
            }
        };

        let metrics = transform(&records);
        for (record, metric) in records.iter().zip(&metrics) {
            tracing::debug!(
                object_id = record.object_id,
                lot = metric.lot.as_str(),
                free_capacity = ?record.free_capacity,
                total_capacity = record.total_capacity,
                free_spaces = metric.free_spaces,
                occupancy_rate = metric.occupancy_rate,
                "Transformed parking record"
            );
        }

        let facility_count = metrics.len();
        let frame_count = self.store.apply_update(metrics);
        tracing::info!(
            facility_count,
            frame_count,
            elapsed = ?started_at.elapsed(),
            "Updated parking data from upstream"
        );
        Ok(frame_count)
    }
}
