//! Core types for instance-reported metrics

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Key prefix marking a counter sample
pub const COUNTER_PREFIX: &str = "c_";

/// Key prefix marking a histogram sample
pub const HISTOGRAM_PREFIX: &str = "h_";

/// Raw value of one metric entry as reported by an instance
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// A single JSON number
    Number(f64),
    /// A JSON array whose elements are all numbers
    NumberList(Vec<f64>),
    /// Anything else (strings, bools, objects, null, mixed arrays)
    Other,
}

impl RawValue {
    /// Short type name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::Number(_) => "number",
            RawValue::NumberList(_) => "number list",
            RawValue::Other => "other",
        }
    }
}

impl From<&Value> for RawValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map(RawValue::Number).unwrap_or(RawValue::Other),
            Value::Array(items) => items
                .iter()
                .map(Value::as_f64)
                .collect::<Option<Vec<f64>>>()
                .map(RawValue::NumberList)
                .unwrap_or(RawValue::Other),
            _ => RawValue::Other,
        }
    }
}

#[cfg(test)]
impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<Vec<f64>> for RawValue {
    fn from(v: Vec<f64>) -> Self {
        RawValue::NumberList(v)
    }
}

/// Metric map reported by one instance
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSample {
    entries: BTreeMap<String, RawValue>,
}

impl RawSample {
    pub fn new() -> Self {
        RawSample::default()
    }

    /// Build from an instance heartbeat payload.
    ///
    /// A payload that is not a JSON object yields an empty sample; the
    /// instance still counts towards the service's instance total.
    pub fn from_json(payload: &Value) -> Self {
        match payload {
            Value::Object(map) => RawSample {
                entries: map
                    .iter()
                    .map(|(k, v)| (k.clone(), RawValue::from(v)))
                    .collect(),
            },
            other => {
                warn!("Instance payload is not an object: {}", other);
                RawSample::default()
            }
        }
    }

    /// Builder-style insert, mostly for tests and fixtures
    pub fn with(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RawValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RawValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, RawValue)> for RawSample {
    fn from_iter<I: IntoIterator<Item = (String, RawValue)>>(iter: I) -> Self {
        RawSample {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Percentile label attached to each histogram line/record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percentile {
    P75,
    P95,
    P99,
    Median,
}

impl Percentile {
    /// Wire order: `[p75, p95, p99, median]`
    pub const ALL: [Percentile; 4] = [
        Percentile::P75,
        Percentile::P95,
        Percentile::P99,
        Percentile::Median,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Percentile::P75 => "75",
            Percentile::P95 => "95",
            Percentile::P99 => "99",
            Percentile::Median => "median",
        }
    }
}

/// Aggregated histogram percentiles for one metric key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistogramPoint {
    pub p75: i64,
    pub p95: i64,
    pub p99: i64,
    pub median: i64,
}

impl HistogramPoint {
    pub fn new(p75: i64, p95: i64, p99: i64, median: i64) -> Self {
        HistogramPoint {
            p75,
            p95,
            p99,
            median,
        }
    }

    /// Parse `[p75, p95, p99, median]`, truncating each value to an integer.
    /// Any other length is rejected.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        match values {
            [p75, p95, p99, median] => Some(HistogramPoint::new(
                *p75 as i64,
                *p95 as i64,
                *p99 as i64,
                *median as i64,
            )),
            _ => None,
        }
    }

    /// Element-wise integer average with `other`, truncating toward zero.
    pub fn average_with(&mut self, other: &HistogramPoint) {
        self.p75 = mean(self.p75, other.p75);
        self.p95 = mean(self.p95, other.p95);
        self.p99 = mean(self.p99, other.p99);
        self.median = mean(self.median, other.median);
    }

    pub fn get(&self, percentile: Percentile) -> i64 {
        match percentile {
            Percentile::P75 => self.p75,
            Percentile::P95 => self.p95,
            Percentile::P99 => self.p99,
            Percentile::Median => self.median,
        }
    }

    /// `(label, value)` pairs in wire order
    pub fn percentiles(&self) -> impl Iterator<Item = (Percentile, i64)> + '_ {
        Percentile::ALL.into_iter().map(move |p| (p, self.get(p)))
    }
}

fn mean(a: i64, b: i64) -> i64 {
    ((a as i128 + b as i128) / 2) as i64
}

/// Counters summed across all instances of a service
pub type AggregatedCounters = BTreeMap<String, i64>;

/// Histograms folded across all instances of a service
pub type AggregatedHistograms = BTreeMap<String, HistogramPoint>;

/// Result of aggregating one service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceAggregate {
    pub counters: AggregatedCounters,
    pub histograms: AggregatedHistograms,
}

impl ServiceAggregate {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.histograms.is_empty()
    }
}
