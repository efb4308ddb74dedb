//! Streaming metric writer.

use std::fmt::Write as _;
use std::io::Write;

use chrono::{DateTime, Utc};
use tracing::error;

use super::{Accumulator, Fields, Metric, MetricKind, Tags};

/// Output encoding for [`MetricWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// InfluxDB line protocol, one metric per line.
    #[default]
    LineProtocol,
    /// One JSON object per line.
    Json,
}

/// Accumulator that writes each metric to `out` as soon as it is added.
///
/// Write failures are logged and counted; they never reach the collector.
pub struct MetricWriter<W: Write> {
    out: W,
    format: OutputFormat,
    written: u64,
    failures: u64,
}

impl<W: Write> MetricWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            written: 0,
            failures: 0,
        }
    }

    /// Number of metrics written successfully.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Number of metrics lost to write errors.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_metric(&mut self, metric: &Metric) -> std::io::Result<()> {
        let line = match self.format {
            OutputFormat::LineProtocol => line_protocol(metric),
            OutputFormat::Json => serde_json::to_string(metric)?,
        };
        writeln!(self.out, "{}", line)?;
        self.out.flush()
    }
}

impl<W: Write> Accumulator for MetricWriter<W> {
    fn add_gauge(&mut self, measurement: &str, fields: Fields, tags: Tags, timestamp: DateTime<Utc>) {
        let metric = Metric {
            name: measurement.to_string(),
            kind: MetricKind::Gauge,
            fields,
            tags,
            timestamp,
        };
        match self.write_metric(&metric) {
            Ok(()) => self.written += 1,
            Err(e) => {
                self.failures += 1;
                error!(measurement, error = %e, "failed to write metric");
            }
        }
    }
}

/// Formats a metric as one line of InfluxDB line protocol.
pub(crate) fn line_protocol(metric: &Metric) -> String {
    let mut line = escape(&metric.name, &[',', ' ']);
    for (key, value) in &metric.tags {
        let _ = write!(
            line,
            ",{}={}",
            escape(key, &[',', '=', ' ']),
            escape(value, &[',', '=', ' '])
        );
    }
    let fields = metric
        .fields
        .iter()
        .map(|(key, value)| format!("{}={}i", escape(key, &[',', '=', ' ']), value))
        .collect::<Vec<_>>()
        .join(",");
    let nanos = metric.timestamp.timestamp_nanos_opt().unwrap_or_default();
    let _ = write!(line, " {} {}", fields, nanos);
    line
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
