//! Sample classification and per-service aggregation
//!
//! Each call builds fresh accumulators; nothing is cached between pull
//! requests or poll cycles.
//!
//! ## Semantics kept for compatibility
//!
//! - Counters add up every instance's *current cumulative* reading. No rate
//!   differencing happens between polls.
//! - Histograms are folded pairwise: the running aggregate is averaged
//!   element-wise with each new sample in encounter order. With three or
//!   more instances the result depends on that order, so callers iterate
//!   instances in a stable (sorted) order.

use super::types::{
    AggregatedCounters, AggregatedHistograms, HistogramPoint, RawSample, RawValue,
    ServiceAggregate, COUNTER_PREFIX, HISTOGRAM_PREFIX,
};
use tracing::{debug, warn};

/// Aggregate the samples of every live instance of one service.
pub fn aggregate<'a, I>(instances: I) -> ServiceAggregate
where
    I: IntoIterator<Item = &'a RawSample>,
{
    let mut result = ServiceAggregate::default();
    for sample in instances {
        collect_counters(sample, &mut result.counters);
        collect_histograms(sample, &mut result.histograms);
    }
    debug!(
        "Aggregated {} counters and {} histograms",
        result.counters.len(),
        result.histograms.len()
    );
    result
}

/// Fold the `c_` entries of one instance into `counters`.
pub fn collect_counters(sample: &RawSample, counters: &mut AggregatedCounters) {
    for (key, value) in sample.iter() {
        if !key.starts_with(COUNTER_PREFIX) {
            continue;
        }
        let readings = match value {
            RawValue::NumberList(readings) => readings,
            other => {
                warn!(
                    "Problem collecting counter {}, expected a list of numbers but got: {}",
                    key,
                    other.kind()
                );
                continue;
            }
        };
        // An empty series has no current reading; the key stays absent.
        let Some(last) = readings.last() else {
            continue;
        };
        let total = counters.entry(key.clone()).or_insert(0);
        *total = total.saturating_add(*last as i64);
    }
}

/// Fold the `h_` entries of one instance into `histograms`.
pub fn collect_histograms(sample: &RawSample, histograms: &mut AggregatedHistograms) {
    for (key, value) in sample.iter() {
        if !key.starts_with(HISTOGRAM_PREFIX) {
            continue;
        }
        let point = match value {
            RawValue::NumberList(values) => HistogramPoint::from_values(values),
            _ => None,
        };
        let Some(point) = point else {
            warn!(
                "Problem collecting histogram {}, expected 4 numbers but got: {}",
                key,
                describe(value)
            );
            continue;
        };
        histograms
            .entry(key.clone())
            .and_modify(|existing| existing.average_with(&point))
            .or_insert(point);
    }
}

fn describe(value: &RawValue) -> String {
    match value {
        RawValue::NumberList(values) => format!("{} numbers", values.len()),
        other => other.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_sample(key: &str, values: &[f64]) -> RawSample {
        RawSample::new().with(key, values.to_vec())
    }

    #[test]
    fn test_counter_sums_last_readings() {
        let instances = vec![
            counter_sample("c_x", &[1.0, 5.0]),
            counter_sample("c_x", &[7.0]),
            counter_sample("c_x", &[100.0, 2.0, 30.9]),
        ];
        let result = aggregate(&instances);
        assert_eq!(result.counters.get("c_x"), Some(&(5 + 7 + 30)));
        assert!(result.histograms.is_empty());
    }

    #[test]
    fn test_empty_counter_is_omitted() {
        let instances = vec![counter_sample("c_empty", &[])];
        let result = aggregate(&instances);
        assert!(!result.counters.contains_key("c_empty"));
    }

    #[test]
    fn test_counter_with_wrong_type_is_skipped() {
        let instances = vec![
            RawSample::new().with("c_x", 4.0),
            RawSample::new()
                .with("c_x", vec![2.0])
                .with("c_y", RawValue::Other),
        ];
        let result = aggregate(&instances);
        assert_eq!(result.counters.get("c_x"), Some(&2));
        assert!(!result.counters.contains_key("c_y"));
    }

    #[test]
    fn test_unprefixed_keys_are_ignored() {
        let instances = vec![RawSample::new()
            .with("requests", vec![1.0])
            .with("v", 3.0)
            .with("ts", 1.5)
            .with("hist", vec![1.0, 2.0, 3.0, 4.0])];
        assert!(aggregate(&instances).is_empty());
    }

    #[test]
    fn test_histogram_pairwise_average() {
        let instances = vec![
            RawSample::new().with("h_lat", vec![75.0, 95.0, 99.0, 50.0]),
            RawSample::new().with("h_lat", vec![95.0, 55.0, 59.0, 50.0]),
        ];
        let result = aggregate(&instances);
        assert_eq!(
            result.histograms.get("h_lat"),
            Some(&HistogramPoint::new(85, 75, 79, 50))
        );
    }

    #[test]
    fn test_histogram_fold_is_order_sensitive() {
        let a = RawSample::new().with("h_lat", vec![0.0, 0.0, 0.0, 0.0]);
        let b = RawSample::new().with("h_lat", vec![40.0, 40.0, 40.0, 40.0]);
        let c = RawSample::new().with("h_lat", vec![80.0, 80.0, 80.0, 80.0]);

        // ((0+40)/2 + 80)/2 = 50
        let forward = aggregate([&a, &b, &c]);
        assert_eq!(forward.histograms["h_lat"].p75, 50);
        // ((80+40)/2 + 0)/2 = 30
        let backward = aggregate([&c, &b, &a]);
        assert_eq!(backward.histograms["h_lat"].p75, 30);
    }

    #[test]
    fn test_malformed_histogram_leaves_aggregate_untouched() {
        let instances = vec![
            RawSample::new().with("h_lat", vec![75.0, 95.0, 99.0, 50.0]),
            RawSample::new().with("h_lat", vec![1.0, 2.0, 3.0]),
            RawSample::new().with("h_lat", RawValue::Other),
            RawSample::new().with("h_lat", 12.0),
        ];
        let result = aggregate(&instances);
        assert_eq!(
            result.histograms.get("h_lat"),
            Some(&HistogramPoint::new(75, 95, 99, 50))
        );
    }

    #[test]
    fn test_single_histogram_passes_through() {
        let instances = vec![RawSample::new().with("h_api_calls", vec![75.0, 95.0, 99.0, 50.0])];
        let result = aggregate(&instances);
        assert_eq!(
            result.histograms["h_api_calls"],
            HistogramPoint::new(75, 95, 99, 50)
        );
    }

    #[test]
    fn test_no_instances() {
        let instances: Vec<RawSample> = Vec::new();
        assert_eq!(aggregate(&instances), ServiceAggregate::default());
    }
}
