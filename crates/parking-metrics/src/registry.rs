//! Prometheus registry populated from a metric snapshot.

use prometheus_client::{
    encoding::{text, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry as RegistryInner,
};

use std::{fmt, io, sync::atomic::AtomicU64};

use crate::{
    format::{Format, PrometheusTextWriter},
    model::MetricSnapshot,
};

/// Label identifying a parking facility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct LotLabel {
    /// Facility name.
    pub lot: String,
}

/// Metrics registry holding the exported metrics for a single [`MetricSnapshot`].
///
/// The registry contains:
///
/// - `constance_parking_frames` counter: number of updates applied since the process start
/// - `constance_parking_free_spaces` gauge family: free spaces per facility
/// - `constance_parking_occupancy_rate` gauge family: occupancy rate per facility
///
/// Since all values are taken from the same snapshot, the encoded output is always consistent.
#[derive(Debug)]
pub struct Registry {
    inner: RegistryInner,
}

impl Registry {
    /// Namespace prepended to the names of all metrics.
    pub const NAMESPACE: &'static str = "constance_parking";

    /// Creates a registry reporting the values from the provided snapshot.
    pub fn from_snapshot(snapshot: &MetricSnapshot) -> Self {
        let frames = Counter::<u64>::default();
        frames.inc_by(snapshot.update_frame_count());

        let free_spaces = Family::<LotLabel, Gauge>::default();
        let occupancy_rate = Family::<LotLabel, Gauge<f64, AtomicU64>>::default();
        for metric in snapshot.facilities() {
            let label = LotLabel {
                lot: metric.lot.clone(),
            };
            free_spaces.get_or_create(&label).set(metric.free_spaces);
            occupancy_rate
                .get_or_create(&label)
                .set(metric.occupancy_rate);
        }

        let mut inner = RegistryInner::with_prefix(Self::NAMESPACE);
        inner.register(
            "frames",
            "Number of updates pulled from the open data platform since the exporter was started",
            frames,
        );
        inner.register(
            "free_spaces",
            "Number of free parking spaces per parking lot in Constance (-1 if unknown)",
            free_spaces,
        );
        inner.register(
            "occupancy_rate",
            "Occupancy rate per parking lot in Constance on the 0 to 1 scale (-1 if unknown)",
            occupancy_rate,
        );
        Self { inner }
    }

    /// Encodes all metrics in this registry using the specified text format.
    ///
    /// # Errors
    ///
    /// Proxies formatting errors of the provided `writer`.
    pub fn encode<W: fmt::Write>(&self, writer: &mut W, format: Format) -> fmt::Result {
        match format {
            Format::OpenMetrics => text::encode(writer, &self.inner),
            Format::Prometheus => {
                let mut writer = PrometheusTextWriter::new(writer);
                text::encode(&mut writer, &self.inner)?;
                writer.flush()
            }
        }
    }

    /// Encodes all metrics in this registry to a byte writer.
    ///
    /// # Errors
    ///
    /// Proxies I/O errors of the provided `writer`.
    pub fn encode_to_writer<W: io::Write>(&self, writer: W, format: Format) -> io::Result<()> {
        let mut writer = WriterWrapper::new(writer);
        self.encode(&mut writer, format)
            .map_err(|_| writer.error.unwrap_or_else(|| io::ErrorKind::Other.into()))
    }
}

#[derive(Debug)]
struct WriterWrapper<W> {
    writer: W,
    error: Option<io::Error>,
}

impl<W: io::Write> WriterWrapper<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
        }
    }
}

impl<W: io::Write> fmt::Write for WriterWrapper<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.writer.write_all(s.as_bytes()).map_err(|err| {
            self.error = Some(err);
            fmt::Error
        })
    }
}
