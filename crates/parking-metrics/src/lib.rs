//! Parking occupancy metrics based on the `prometheus-client` crate.
//!
//! # Overview
//!
//! - Occupancy data for parking facilities arrives as [`UpstreamRecord`]s (one per facility),
//!   typically deserialized from the open data platform's JSON response.
//! - Records are converted to [`FacilityMetric`]s by [`transform()`]. This is the only place where
//!   missing readings and non-positive capacities are turned into sentinel (`-1`) values.
//! - Transformed batches are applied to a [`MetricStore`], which keeps the latest value per facility
//!   together with a frame counter incremented on each applied batch. Readers obtain consistent
//!   [`MetricSnapshot`]s; a snapshot never mixes data from two different batches.
//! - A snapshot is turned into a [`Registry`] of Prometheus metrics, which can be [encoded](Registry::encode())
//!   in one of the supported text [`Format`]s.
//!
//! # Examples
//!
//! ```
//! use parking_metrics::{transform, Format, MetricStore, Registry, UpstreamRecord};
//!
//! let record = UpstreamRecord::new(1, "Marktstätte", 300, Some(45));
//! let store = MetricStore::new();
//! store.apply_update(transform(&[record]));
//!
//! let snapshot = store.snapshot();
//! assert_eq!(snapshot.update_frame_count(), 1);
//! let metric = snapshot.get("Marktstätte").unwrap();
//! assert_eq!(metric.free_spaces, 45);
//!
//! let mut buffer = String::new();
//! Registry::from_snapshot(&snapshot).encode(&mut buffer, Format::OpenMetrics)?;
//! assert!(buffer.contains(r#"constance_parking_free_spaces{lot="Marktstätte"} 45"#));
//! # Ok::<_, std::fmt::Error>(())
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod format;
mod model;
mod registry;
mod store;
mod transform;

pub use crate::{
    format::Format,
    model::{FacilityMetric, MetricSnapshot, UpstreamRecord},
    registry::{LotLabel, Registry},
    store::MetricStore,
    transform::{transform, transform_record, SENTINEL},
};
