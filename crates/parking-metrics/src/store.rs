//! In-memory store of the latest facility metrics.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use crate::model::{FacilityMetric, MetricSnapshot};

/// Store of the latest metric values per facility.
///
/// The store is shared between a single writer (the refresh cycle) and any number of readers
/// (scrape requests). Updates are copy-on-write: a reader holding a [`MetricSnapshot`] keeps
/// observing it unchanged, and an update becomes visible to new readers all at once, together
/// with the incremented frame counter.
///
/// Facilities are never removed; a facility missing from an update keeps its last value.
pub struct MetricStore {
    current: RwLock<Arc<MetricSnapshot>>,
}

impl fmt::Debug for MetricStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        formatter
            .debug_struct("MetricStore")
            .field("facilities", &snapshot.len())
            .field("update_frame_count", &snapshot.update_frame_count)
            .finish()
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricStore {
    /// Creates an empty store with the frame counter set to 0.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::default()),
        }
    }

    /// Overwrites metrics for each facility in `metrics` and increments the frame counter.
    /// Returns the updated frame count.
    ///
    /// If `metrics` contains several entries for the same facility, the last one wins.
    pub fn apply_update(&self, metrics: impl IntoIterator<Item = FacilityMetric>) -> u64 {
        let metrics: Vec<_> = metrics.into_iter().collect();

        // The snapshot is replaced as a whole, so a poisoned lock never guards a partially applied update.
        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = MetricSnapshot::clone(&current);
        for metric in metrics {
            snapshot.facilities.insert(metric.lot.clone(), metric);
        }
        snapshot.update_frame_count += 1;
        let frame_count = snapshot.update_frame_count;
        *current = Arc::new(snapshot);
        frame_count
    }

    /// Returns the current snapshot of all metrics.
    pub fn snapshot(&self) -> Arc<MetricSnapshot> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }
}
