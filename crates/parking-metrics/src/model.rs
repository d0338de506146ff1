//! Data model: upstream records and derived per-facility metrics.

use serde::Deserialize;

use std::collections::BTreeMap;

/// Single parking facility as reported by the open data platform.
///
/// Field names follow the attribute names of the ArcGIS feature layer; fields not used
/// for metrics are retained for logging and are optional on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpstreamRecord {
    /// Opaque feature ID. Not guaranteed to be stable across requests.
    #[serde(rename = "OBJECTID")]
    pub object_id: i64,
    /// Secondary ID assigned by the platform.
    #[serde(default)]
    pub id: Option<f64>,
    /// Facility name; used as the `lot` label of the exported metrics.
    pub name: String,
    /// Nominal capacity of the facility.
    #[serde(rename = "max_cap", default)]
    pub max_capacity: Option<f64>,
    /// Facility type (e.g., parking garage vs. open lot).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Latitude in WGS 84.
    #[serde(default)]
    pub lat: Option<f64>,
    /// Longitude in WGS 84.
    #[serde(default)]
    pub lon: Option<f64>,
    /// Number of free spaces, or `None` if the platform has no live reading for the facility.
    #[serde(rename = "real_fcap", default)]
    pub free_capacity: Option<i64>,
    /// Total number of spaces the facility currently offers. May be 0 if no capacity is configured.
    #[serde(rename = "real_capa", default)]
    pub total_capacity: i64,
}

impl UpstreamRecord {
    /// Creates a record with the fields relevant for metrics; informational fields are left empty.
    pub fn new(
        object_id: i64,
        name: impl Into<String>,
        total_capacity: i64,
        free_capacity: Option<i64>,
    ) -> Self {
        Self {
            object_id,
            id: None,
            name: name.into(),
            max_capacity: None,
            kind: None,
            lat: None,
            lon: None,
            free_capacity,
            total_capacity,
        }
    }
}

/// Metric values derived for a single facility.
#[derive(Debug, Clone, PartialEq)]
pub struct FacilityMetric {
    /// Facility name.
    pub lot: String,
    /// Number of free spaces, or `-1` if there is no live reading.
    pub free_spaces: i64,
    /// Occupancy rate in `[0, 1]`, or `-1` if it cannot be computed.
    pub occupancy_rate: f64,
}

/// Point-in-time view of all facility metrics together with the number of applied updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    pub(crate) facilities: BTreeMap<String, FacilityMetric>,
    pub(crate) update_frame_count: u64,
}

impl MetricSnapshot {
    /// Returns the number of updates applied since the store was created.
    pub fn update_frame_count(&self) -> u64 {
        self.update_frame_count
    }

    /// Returns metrics for the specified facility, if it was ever reported.
    pub fn get(&self, lot: &str) -> Option<&FacilityMetric> {
        self.facilities.get(lot)
    }

    /// Iterates over all facilities ordered by name.
    pub fn facilities(&self) -> impl ExactSizeIterator<Item = &FacilityMetric> + '_ {
        self.facilities.values()
    }

    /// Returns the number of facilities in this snapshot.
    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    /// Checks whether this snapshot contains no facilities.
    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }
}
