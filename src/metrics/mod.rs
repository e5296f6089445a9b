//! Instance Metrics Aggregation
//!
//! Running instances report ad-hoc telemetry in their heartbeat payload.
//! Keys prefixed `c_` are counters (list of cumulative readings, last one
//! wins), keys prefixed `h_` are histograms (`[p75, p95, p99, median]`).
//! This module classifies those entries and folds them across all live
//! instances of a service. The exporters in [`crate::export`] turn the
//! result into wire formats.

mod aggregate;
mod sanitize;
mod types;

pub use aggregate::{aggregate, collect_counters, collect_histograms};
pub use sanitize::sanitize;
pub use types::{
    AggregatedCounters, AggregatedHistograms, HistogramPoint, Percentile, RawSample, RawValue,
    ServiceAggregate, COUNTER_PREFIX, HISTOGRAM_PREFIX,
};
