//! Metric kinds, values and the serialized snapshot sent to the trap.

use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// The four metric families the registry stores separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Text,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Text => "text",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which metric kinds a snapshot clears after reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPolicy {
    pub counters: bool,
    pub gauges: bool,
    pub histograms: bool,
    pub text: bool,
}

impl ResetPolicy {
    /// Nothing is cleared; every snapshot is cumulative.
    pub const NONE: ResetPolicy = ResetPolicy {
        counters: false,
        gauges: false,
        histograms: false,
        text: false,
    };

    pub fn resets(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Counter => self.counters,
            MetricKind::Gauge => self.gauges,
            MetricKind::Histogram => self.histograms,
            MetricKind::Text => self.text,
        }
    }
}

impl Default for ResetPolicy {
    /// Rates (counters, histograms) reset; last-known state (gauges, text) is kept.
    fn default() -> Self {
        ResetPolicy {
            counters: true,
            gauges: false,
            histograms: true,
            text: false,
        }
    }
}

/// A gauge reading, keeping the numeric kind it was written with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GaugeValue {
    Int(i64),
    Uint(u64),
    Float(f64),
}

impl GaugeValue {
    /// Wire type tag for this numeric kind.
    pub fn type_code(&self) -> &'static str {
        match self {
            GaugeValue::Int(_) => "l",
            GaugeValue::Uint(_) => "L",
            GaugeValue::Float(_) => "n",
        }
    }

    /// Adds `delta`, keeping integer arithmetic when both sides are integers.
    pub fn add(self, delta: GaugeValue) -> GaugeValue {
        match (self, delta) {
            (GaugeValue::Int(a), GaugeValue::Int(b)) => GaugeValue::Int(a.wrapping_add(b)),
            (GaugeValue::Uint(a), GaugeValue::Uint(b)) => GaugeValue::Uint(a.wrapping_add(b)),
            (GaugeValue::Int(a), GaugeValue::Uint(b)) | (GaugeValue::Uint(b), GaugeValue::Int(a)) => {
                GaugeValue::Int(a.wrapping_add(b as i64))
            }
            (a, b) => GaugeValue::Float(a.as_f64() + b.as_f64()),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            GaugeValue::Int(v) => v as f64,
            GaugeValue::Uint(v) => v as f64,
            GaugeValue::Float(v) => v,
        }
    }
}

impl From<i64> for GaugeValue {
    fn from(v: i64) -> Self {
        GaugeValue::Int(v)
    }
}

impl From<i32> for GaugeValue {
    fn from(v: i32) -> Self {
        GaugeValue::Int(v as i64)
    }
}

impl From<u64> for GaugeValue {
    fn from(v: u64) -> Self {
        GaugeValue::Uint(v)
    }
}

impl From<u32> for GaugeValue {
    fn from(v: u32) -> Self {
        GaugeValue::Uint(v as u64)
    }
}

impl From<f64> for GaugeValue {
    fn from(v: f64) -> Self {
        GaugeValue::Float(v)
    }
}

/// One captured metric, as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(GaugeValue),
    Histogram(Vec<String>),
    Text(String),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Histogram(_) => MetricKind::Histogram,
            MetricValue::Text(_) => MetricKind::Text,
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("MetricValue", 2)?;
        match self {
            MetricValue::Counter(v) => {
                state.serialize_field("_type", "L")?;
                state.serialize_field("_value", v)?;
            }
            MetricValue::Gauge(g) => {
                state.serialize_field("_type", g.type_code())?;
                match g {
                    GaugeValue::Int(v) => state.serialize_field("_value", v)?,
                    GaugeValue::Uint(v) => state.serialize_field("_value", v)?,
                    GaugeValue::Float(v) => state.serialize_field("_value", v)?,
                }
            }
            MetricValue::Histogram(buckets) => {
                state.serialize_field("_type", "n")?;
                state.serialize_field("_value", buckets)?;
            }
            MetricValue::Text(s) => {
                state.serialize_field("_type", "s")?;
                state.serialize_field("_value", s)?;
            }
        }
        state.end()
    }
}

/// Everything captured by one registry snapshot, keyed by full metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    metrics: BTreeMap<String, MetricValue>,
}

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: String, value: MetricValue) {
        self.metrics.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.metrics.iter()
    }

    /// Number of captured metrics of one kind.
    pub fn count_of(&self, kind: MetricKind) -> usize {
        self.metrics.values().filter(|v| v.kind() == kind).count()
    }

    /// Renders the trap submission body.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.metrics)
    }
}
