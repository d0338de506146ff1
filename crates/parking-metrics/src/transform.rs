//! Conversion of upstream records into facility metrics.

use crate::model::{FacilityMetric, UpstreamRecord};

/// Value reported for metrics that cannot be determined from upstream data.
pub const SENTINEL: i64 = -1;

#[allow(clippy::cast_precision_loss)] // `SENTINEL` is exactly representable
const SENTINEL_RATE: f64 = SENTINEL as f64;

/// Converts a batch of records, producing exactly one metric per record in the same order.
pub fn transform(records: &[UpstreamRecord]) -> Vec<FacilityMetric> {
    records.iter().map(transform_record).collect()
}

/// Converts a single record.
///
/// - If there is no free capacity reading (or the reading is negative), both metrics are set
///   to [`SENTINEL`].
/// - Otherwise, the free spaces metric is the reading, and the occupancy rate is
///   `1 - free / total` computed in floating-point arithmetic and clamped to `[0, 1]`.
///   If the total capacity is not positive, the rate is [`SENTINEL`].
pub fn transform_record(record: &UpstreamRecord) -> FacilityMetric {
    let lot = record.name.clone();
    let Some(free) = record.free_capacity.filter(|&free| free >= 0) else {
        return FacilityMetric {
            lot,
            free_spaces: SENTINEL,
            occupancy_rate: SENTINEL_RATE,
        };
    };

    let occupancy_rate = if record.total_capacity > 0 {
        #[allow(clippy::cast_precision_loss)] // capacities are far below 2^52
        let rate = 1.0 - free as f64 / record.total_capacity as f64;
        rate.clamp(0.0, 1.0)
    } else {
        SENTINEL_RATE
    };
    FacilityMetric {
        lot,
        free_spaces: free,
        occupancy_rate,
    }
}
