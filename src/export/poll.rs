//! Zabbix push loop
//!
//! A single background task. Each cycle re-reads `zabbix_enabled` and
//! `zabbix_interval` from the config cache, so toggling export or changing
//! the cadence takes effect without a restart.
//!
//! ```text
//!        ┌──────────────────── sleep(zabbix_interval) ◄──────────────┐
//!        ▼                                                           │
//!   read config ── disabled ─────────────────────────────────────────┤
//!        │ enabled                                                   │
//!        ▼                                                           │
//!   list services ─► per service: instances ─► aggregate ─► records  │
//!        │                                                           │
//!        └──► one trapper send for the whole batch ──────────────────┘
//! ```
//!
//! A shutdown message is honoured between cycles and while sleeping.

use super::trapper::{decode_response, ExportRecord, TrapperSender};
use crate::clock::{Clock, UnixTimestamp};
use crate::config::{ConfigCache, ZABBIX_ENABLED, ZABBIX_HOST, ZABBIX_INTERVAL, ZABBIX_PORT};
use crate::metrics::aggregate;
use crate::store::{TopologyError, TopologyProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// `host` field of every pushed record
pub const TRAPPER_HOST: &str = "ccentral";

/// Sleep used when the interval option cannot be read
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Lower bound on the sleep between cycles
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Build the record batch for every service. Only a failed service
/// listing is an error; a service whose instances cannot be read is
/// logged and left out.
pub async fn collect_records(
    topology: &dyn TopologyProvider,
    now: UnixTimestamp,
) -> Result<Vec<ExportRecord>, TopologyError> {
    let clock = now.as_secs() as i64;
    let services = topology.list_services().await?;

    let mut records = Vec::new();
    for service_id in &services {
        debug!("Handling service {}", service_id);
        let instances = match topology.list_instances(service_id).await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("Skipping service {}: {}", service_id, e);
                continue;
            }
        };

        records.push(ExportRecord::new(
            TRAPPER_HOST,
            format!("{}.instances", service_id),
            instances.len(),
            clock,
        ));

        let aggregate = aggregate(instances.values());
        for (key, value) in &aggregate.counters {
            records.push(ExportRecord::new(
                TRAPPER_HOST,
                format!("{}.{}", service_id, key),
                value,
                clock,
            ));
        }
        for (key, point) in &aggregate.histograms {
            for (percentile, value) in point.percentiles() {
                records.push(ExportRecord::new(
                    TRAPPER_HOST,
                    format!("{}.{}.{}", service_id, key, percentile.label()),
                    value,
                    clock,
                ));
            }
        }
    }
    Ok(records)
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Export switched off
    Disabled,
    /// Service listing failed; nothing sent
    TopologyUnavailable,
    /// Collector address could not be read from config
    Misconfigured,
    /// Batch delivered
    Sent { records: usize },
    /// Delivery failed; batch dropped
    SendFailed { records: usize },
}

/// One export cycle and the config reads around it
pub struct PushExporter {
    topology: Arc<dyn TopologyProvider>,
    config: Arc<ConfigCache>,
    clock: Arc<dyn Clock>,
}

impl PushExporter {
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        config: Arc<ConfigCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        PushExporter {
            topology,
            config,
            clock,
        }
    }

    pub async fn enabled(&self) -> bool {
        match self.config.get_bool(ZABBIX_ENABLED).await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Zabbix export disabled: {}", e);
                false
            }
        }
    }

    /// Sleep before the next cycle
    pub async fn interval(&self) -> Duration {
        match self.config.get_int(ZABBIX_INTERVAL).await {
            Ok(secs) if secs >= 1 => Duration::from_secs(secs as u64),
            Ok(secs) => {
                warn!("Zabbix interval {}s too small, using {:?}", secs, MIN_POLL_INTERVAL);
                MIN_POLL_INTERVAL
            }
            Err(e) => {
                warn!("Using default Zabbix interval: {}", e);
                DEFAULT_POLL_INTERVAL
            }
        }
    }

    async fn sender(&self) -> Option<TrapperSender> {
        let host = self.config.get_string(ZABBIX_HOST).await;
        let port = self.config.get_int(ZABBIX_PORT).await;
        match (host, port) {
            (Ok(host), Ok(port)) => match u16::try_from(port) {
                Ok(port) => Some(TrapperSender::new(host, port)),
                Err(_) => {
                    warn!("Zabbix port {} out of range", port);
                    None
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!("Zabbix collector not configured: {}", e);
                None
            }
        }
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        if !self.enabled().await {
            return CycleOutcome::Disabled;
        }

        let now = self.clock.now();
        let records = match collect_records(self.topology.as_ref(), now).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not retrieve service list: {}", e);
                return CycleOutcome::TopologyUnavailable;
            }
        };
        for record in &records {
            debug!("Zabbix: {}", record);
        }

        let Some(sender) = self.sender().await else {
            return CycleOutcome::Misconfigured;
        };
        let count = records.len();
        let send_clock = self.clock.now().as_secs() as i64;
        match sender.send(records, send_clock).await {
            Ok(reply) => {
                match decode_response(&reply) {
                    Ok(response) => debug!(
                        "Zabbix replied {}: {}",
                        response.response,
                        response.info.unwrap_or_default()
                    ),
                    Err(e) => debug!("Unparsed Zabbix reply: {}", e),
                }
                info!("Sent total of {} records to Zabbix at {}", count, sender.addr());
                CycleOutcome::Sent { records: count }
            }
            Err(e) => {
                warn!("Failed to send data to Zabbix at {}: {}", sender.addr(), e);
                CycleOutcome::SendFailed { records: count }
            }
        }
    }
}

/// Messages for the poll loop
pub enum PollMessage {
    /// Stop after the current cycle; acked once the loop has exited
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// Long-running push task
pub struct PollLoop {
    exporter: PushExporter,
    rx: mpsc::UnboundedReceiver<PollMessage>,
}

impl PollLoop {
    pub async fn run(mut self) {
        info!("Zabbix poll loop started");
        // Once every handle is gone nobody can stop the loop; it keeps
        // running for the life of the process.
        let mut detached = false;
        loop {
            if !detached {
                match self.rx.try_recv() {
                    Ok(PollMessage::Shutdown { response_tx }) => {
                        info!("Zabbix poll loop stopped");
                        let _ = response_tx.send(());
                        return;
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => detached = true,
                    Err(mpsc::error::TryRecvError::Empty) => {}
                }
            }

            let outcome = self.exporter.run_cycle().await;
            debug!("Zabbix cycle finished: {:?}", outcome);

            let interval = self.exporter.interval().await;
            if detached {
                tokio::time::sleep(interval).await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                msg = self.rx.recv() => match msg {
                    Some(PollMessage::Shutdown { response_tx }) => {
                        info!("Zabbix poll loop stopped");
                        let _ = response_tx.send(());
                        return;
                    }
                    None => {
                        detached = true;
                        tokio::time::sleep(interval).await;
                    }
                },
            }
        }
    }
}

/// Handle for stopping the poll loop
#[derive(Clone)]
pub struct PollLoopHandle {
    tx: mpsc::UnboundedSender<PollMessage>,
}

impl PollLoopHandle {
    /// Ask the loop to stop and wait until it has
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(PollMessage::Shutdown { response_tx }).is_ok() {
            let _ = response_rx.await;
        }
    }
}

/// Spawn the poll loop and return its handle + join handle
pub fn spawn_poll_loop(exporter: PushExporter) -> (PollLoopHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(PollLoop { exporter, rx }.run());
    (PollLoopHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{Instances, MemoryStore, ServiceId, StoreFuture};

    fn store_at(clock: &ManualClock) -> MemoryStore {
        MemoryStore::with_clock(Arc::new(clock.clone()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_collect_records_layout() {
        let clock = ManualClock::from_secs(1_700_000_000);
        let store = store_at(&clock);
        store.register_instance("Api-1", "a", r#"{"c_req": [1, 2], "h_lat": [75, 95, 99, 50]}"#);
        store.register_instance("Api-1", "b", r#"{"c_req": [5], "h_lat": [95, 55, 59, 50]}"#);
        store.register_instance("idle", "x", r#"{"c_none": []}"#);

        let records = collect_records(&store, clock.now()).await.unwrap();
        let flat: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.key.clone(), r.value.clone()))
            .collect();
        let expected: Vec<(String, String)> = [
            ("Api-1.instances", "2"),
            ("Api-1.c_req", "7"),
            ("Api-1.h_lat.75", "85"),
            ("Api-1.h_lat.95", "75"),
            ("Api-1.h_lat.99", "79"),
            ("Api-1.h_lat.median", "50"),
            ("idle.instances", "1"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(flat, expected);
        assert!(records
            .iter()
            .all(|r| r.host == TRAPPER_HOST && r.clock == 1_700_000_000));
    }

    /// Lists two services but fails to read the second one's instances
    struct PartialTopology {
        inner: MemoryStore,
    }

    impl TopologyProvider for PartialTopology {
        fn list_services(&self) -> StoreFuture<'_, Vec<ServiceId>> {
            Box::pin(async { Ok(vec!["good".to_string(), "bad".to_string()]) })
        }

        fn list_instances<'a>(&'a self, service_id: &'a str) -> StoreFuture<'a, Instances> {
            Box::pin(async move {
                if service_id == "bad" {
                    Err(TopologyError::Unavailable("timeout".to_string()))
                } else {
                    self.inner.list_instances(service_id).await
                }
            })
        }
    }

    #[tokio::test]
    async fn test_failed_service_is_skipped() {
        let clock = ManualClock::from_secs(10);
        let inner = store_at(&clock);
        inner.register_instance("good", "i1", r#"{"c_x": [3]}"#);
        let topology = PartialTopology { inner };

        let records = collect_records(&topology, clock.now()).await.unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["good.instances", "good.c_x"]);
    }

    #[tokio::test]
    async fn test_disabled_cycle_sends_nothing() {
        let clock = ManualClock::from_secs(10);
        let store = store_at(&clock);
        let config = Arc::new(ConfigCache::new(
            "ccentral",
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(10),
        ));
        crate::config::register_exporter_schema(&config);
        let exporter = PushExporter::new(Arc::new(store), config, Arc::new(clock));

        assert_eq!(exporter.run_cycle().await, CycleOutcome::Disabled);
        assert_eq!(exporter.interval().await, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_interval_is_clamped() {
        let clock = ManualClock::from_secs(10);
        let store = store_at(&clock);
        store.set_config_item("ccentral", ZABBIX_INTERVAL, "0");
        let config = Arc::new(ConfigCache::new(
            "ccentral",
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Duration::from_secs(10),
        ));
        crate::config::register_exporter_schema(&config);
        let exporter = PushExporter::new(Arc::new(store), config, Arc::new(clock));

        assert_eq!(exporter.interval().await, MIN_POLL_INTERVAL);
    }
}
