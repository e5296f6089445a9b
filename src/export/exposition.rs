//! Prometheus text exposition
//!
//! Every value is exposed as a gauge:
//!
//! ```text
//! # TYPE cc_<service>_instances gauge
//! cc_<service>_instances <count> <epoch_ms>
//! # TYPE cc_<service>_<metric> gauge
//! cc_<service>_<metric> <value> <epoch_ms>
//! ```
//!
//! Histograms get one line per percentile with a `percentile` label.
//! Names pass through [`sanitize`]; timestamps are milliseconds.

use crate::clock::UnixTimestamp;
use crate::metrics::{aggregate, sanitize, HistogramPoint, ServiceAggregate};
use crate::store::{TopologyError, TopologyProvider};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Namespace prefix of every exposed metric
pub const METRIC_NAMESPACE: &str = "cc";

/// Content type of the exposition body
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render every service of `topology`. A topology error aborts the whole
/// render; no partial payload is returned.
pub async fn render(
    topology: &dyn TopologyProvider,
    now: UnixTimestamp,
) -> Result<Bytes, TopologyError> {
    let epoch = now.as_millis();
    let services = topology.list_services().await.map_err(|e| {
        warn!("Could not retrieve service list: {}", e);
        e
    })?;

    let mut buf = BytesMut::with_capacity(4096);
    for service_id in &services {
        debug!("Handling service {}", service_id);
        let instances = topology.list_instances(service_id).await.map_err(|e| {
            warn!("Could not retrieve instance list for {}: {}", service_id, e);
            e
        })?;
        let aggregate = aggregate(instances.values());
        write_service(&mut buf, service_id, instances.len(), &aggregate, epoch);
    }
    Ok(buf.freeze())
}

/// Append the blocks of one service: instance count, counters, histograms.
pub fn write_service(
    buf: &mut BytesMut,
    service_id: &str,
    instance_count: usize,
    aggregate: &ServiceAggregate,
    epoch: u64,
) {
    let service = sanitize(service_id);

    let name = format!("{}_{}_instances", METRIC_NAMESPACE, service);
    write_gauge(buf, &name, instance_count as i64, epoch);

    for (key, value) in &aggregate.counters {
        let name = format!("{}_{}_{}", METRIC_NAMESPACE, service, sanitize(key));
        write_gauge(buf, &name, *value, epoch);
    }

    for (key, point) in &aggregate.histograms {
        let name = format!("{}_{}_{}", METRIC_NAMESPACE, service, sanitize(key));
        write_histogram(buf, &name, point, epoch);
    }
}

fn write_gauge(buf: &mut BytesMut, name: &str, value: i64, epoch: u64) {
    write_type(buf, name);
    buf.put_slice(format!("{} {} {}\n", name, value, epoch).as_bytes());
}

fn write_histogram(buf: &mut BytesMut, name: &str, point: &HistogramPoint, epoch: u64) {
    write_type(buf, name);
    for (percentile, value) in point.percentiles() {
        buf.put_slice(
            format!(
                "{}{{percentile=\"{}\"}} {} {}\n",
                name,
                percentile.label(),
                value,
                epoch
            )
            .as_bytes(),
        );
    }
}

fn write_type(buf: &mut BytesMut, name: &str) {
    buf.put_slice(format!("# TYPE {} gauge\n", name).as_bytes());
}
