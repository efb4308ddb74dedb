//! Metric sink abstraction.
//!
//! The collector hands every decoded sample to an [`Accumulator`]. Two sinks
//! are provided:
//! - [`MemoryAccumulator`] keeps metrics in memory (tests, embedding)
//! - [`MetricWriter`] writes InfluxDB line protocol or JSON lines to any `Write`

mod writer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use writer::{MetricWriter, OutputFormat};

/// Field values keyed by field name.
pub type Fields = BTreeMap<String, i64>;

/// Tag values keyed by tag name.
pub type Tags = BTreeMap<String, String>;

/// Kind of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time measurement.
    Gauge,
}

/// A single emitted metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub fields: Fields,
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

/// Receiver of collected metrics.
pub trait Accumulator {
    /// Records a gauge measurement.
    fn add_gauge(&mut self, measurement: &str, fields: Fields, tags: Tags, timestamp: DateTime<Utc>);
}

/// Accumulator that keeps every metric in memory.
#[derive(Debug, Default)]
pub struct MemoryAccumulator {
    metrics: Vec<Metric>,
}

impl MemoryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Removes and returns all collected metrics.
    pub fn drain(&mut self) -> Vec<Metric> {
        std::mem::take(&mut self.metrics)
    }
}

impl Accumulator for MemoryAccumulator {
    fn add_gauge(&mut self, measurement: &str, fields: Fields, tags: Tags, timestamp: DateTime<Utc>) {
        self.metrics.push(Metric {
            name: measurement.to_string(),
            kind: MetricKind::Gauge,
            fields,
            tags,
            timestamp,
        });
    }
}
