//! Supported text formats for exported metrics.

use std::{fmt, mem};

/// Suffix of counter samples in OpenMetrics.
const COUNTER_SUFFIX: &str = "_total";

/// Metrics export format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// [OpenMetrics text format][om], as produced by [`prometheus-client`].
    ///
    /// [om]: https://github.com/OpenObservability/OpenMetrics/blob/main/specification/OpenMetrics.md
    /// [`prometheus-client`]: https://docs.rs/prometheus-client/
    OpenMetrics,
    /// [Prometheus text format][prom]. Obtained by a streaming transform of OpenMetrics-encoded metrics.
    /// Counter families are named after their samples (i.e., with the `_total` suffix),
    /// so that counters are reported identically in both formats.
    ///
    /// [prom]: https://prometheus.io/docs/instrumenting/exposition_formats/
    Prometheus,
}

impl Format {
    /// Content type of the OpenMetrics text format.
    pub const OPEN_METRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";
    /// Content type of the Prometheus text format.
    pub const PROMETHEUS_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";

    /// Returns the value of the `Content-Type` header for metrics encoded in this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Prometheus => Self::PROMETHEUS_CONTENT_TYPE,
            Self::OpenMetrics => Self::OPEN_METRICS_CONTENT_TYPE,
        }
    }

    /// Parses the format from its kebab-case name, e.g. `openmetrics` or `prometheus`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "openmetrics" => Self::OpenMetrics,
            "prometheus" => Self::Prometheus,
            _ => return None,
        })
    }
}

/// Converts OpenMetrics text written into it to the Prometheus text format line by line.
///
/// `prometheus-client` declares counter families without the `_total` suffix, while counter samples
/// carry it. In the Prometheus format, the family name must match the sample name, so `# HELP` and
/// `# TYPE` lines of counters get the suffix appended. The `# EOF` terminator is dropped.
#[must_use = "Must be `flush()`ed to not lose the last line"]
#[derive(Debug)]
pub(crate) struct PrometheusTextWriter<'a, W> {
    writer: &'a mut W,
    partial_line: String,
    /// `# HELP` line waiting for the following `# TYPE` line; the type decides the family name.
    pending_help: Option<(String, String)>,
}

impl<'a, W: fmt::Write> PrometheusTextWriter<'a, W> {
    pub(crate) fn new(writer: &'a mut W) -> Self {
        Self {
            writer,
            partial_line: String::new(),
            pending_help: None,
        }
    }

    fn write_pending_help(&mut self, family_name: Option<&str>) -> fmt::Result {
        let Some((name, help)) = self.pending_help.take() else {
            return Ok(());
        };
        let name = family_name.unwrap_or(&name);
        writeln!(self.writer, "# HELP {name} {help}")
    }

    fn handle_line(&mut self, line: &str) -> fmt::Result {
        if line == "# EOF" {
            return self.write_pending_help(None);
        }

        if let Some(help) = line.strip_prefix("# HELP ") {
            self.write_pending_help(None)?;
            let (name, help) = help.split_once(' ').unwrap_or((help, ""));
            self.pending_help = Some((name.to_owned(), help.to_owned()));
            return Ok(());
        }

        if let Some(type_def) = line.strip_prefix("# TYPE ") {
            let (name, ty) = type_def.trim().split_once(' ').ok_or(fmt::Error)?;
            if ty != "counter" || name.ends_with(COUNTER_SUFFIX) {
                self.write_pending_help(None)?;
                return writeln!(self.writer, "{line}");
            }

            let family_name = format!("{name}{COUNTER_SUFFIX}");
            let help_matches = self
                .pending_help
                .as_ref()
                .is_some_and(|(help_name, _)| help_name == name);
            self.write_pending_help(help_matches.then_some(family_name.as_str()))?;
            return writeln!(self.writer, "# TYPE {family_name} counter");
        }

        self.write_pending_help(None)?;
        writeln!(self.writer, "{line}")
    }

    pub(crate) fn flush(mut self) -> fmt::Result {
        let line = mem::take(&mut self.partial_line);
        if !line.is_empty() {
            self.handle_line(&line)?;
        }
        self.write_pending_help(None)
    }
}

impl<W: fmt::Write> fmt::Write for PrometheusTextWriter<'_, W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut rest = s;
        while let Some(pos) = rest.find('\n') {
            self.partial_line.push_str(&rest[..pos]);
            let line = mem::take(&mut self.partial_line);
            self.handle_line(&line)?;
            rest = &rest[pos + 1..];
        }
        self.partial_line.push_str(rest);
        Ok(())
    }
}
