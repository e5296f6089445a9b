//! In-process service store
//!
//! Instance registrations carry a TTL: an instance is live only while it
//! keeps renewing its heartbeat. Expired registrations are invisible to
//! every read and are dropped by [`MemoryStore::evict_expired`].

use super::{
    Config, ConfigItem, ConfigSource, InstanceId, Instances, Schema, ServiceId, ServiceView,
    StoreFuture, TopologyError, TopologyProvider,
};
use crate::clock::{Clock, SystemClock, UnixTimestamp};
use crate::metrics::RawSample;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Heartbeat lifetime used when none is configured
pub const DEFAULT_INSTANCE_TTL: Duration = Duration::from_secs(60);

/// Config key holding the configuration version
const VERSION_KEY: &str = "v";

#[derive(Debug, Clone, Default)]
struct ServiceRecord {
    schema: Option<Schema>,
    config: Config,
    clients: BTreeMap<InstanceId, Registration>,
    info: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct Registration {
    payload: String,
    expires_at: UnixTimestamp,
}

impl ServiceRecord {
    fn live_clients(
        &self,
        now: UnixTimestamp,
    ) -> impl Iterator<Item = (&InstanceId, &Registration)> {
        self.clients.iter().filter(move |(_, r)| r.expires_at > now)
    }
}

/// In-memory store shared by the admin API, the config cache and the
/// exporters. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    services: Arc<RwLock<BTreeMap<ServiceId, ServiceRecord>>>,
    clock: Arc<dyn Clock>,
    instance_ttl: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store on system time with the default instance TTL
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_INSTANCE_TTL)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, instance_ttl: Duration) -> Self {
        MemoryStore {
            services: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
            instance_ttl,
        }
    }

    pub fn instance_ttl(&self) -> Duration {
        self.instance_ttl
    }

    /// Record a heartbeat from `instance_id`, (re)starting its TTL.
    /// Unknown services are created on first heartbeat.
    pub fn register_instance(
        &self,
        service_id: &str,
        instance_id: &str,
        payload: impl Into<String>,
    ) {
        let expires_at = self.clock.now() + self.instance_ttl;
        let mut services = self.services.write();
        let record = services.entry(service_id.to_string()).or_default();
        record.clients.insert(
            instance_id.to_string(),
            Registration {
                payload: payload.into(),
                expires_at,
            },
        );
        debug!("Heartbeat from {}/{}", service_id, instance_id);
    }

    /// Remove expired registrations; returns how many were dropped
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut services = self.services.write();
        let mut evicted = 0;
        for record in services.values_mut() {
            let before = record.clients.len();
            record.clients.retain(|_, r| r.expires_at > now);
            evicted += before - record.clients.len();
        }
        evicted
    }

    /// Schema of `service_id`
    pub fn get_schema(&self, service_id: &str) -> Result<Schema, TopologyError> {
        self.services
            .read()
            .get(service_id)
            .and_then(|r| r.schema.clone())
            .ok_or_else(|| TopologyError::NotFound(format!("/services/{}/schema", service_id)))
    }

    /// Set one configuration value, bump the `v` version item and return
    /// the new version.
    pub fn set_config_item(&self, service_id: &str, key_id: &str, value: &str) -> String {
        let changed = self.clock.now().as_secs() as i64;
        let mut services = self.services.write();
        let record = services.entry(service_id.to_string()).or_default();
        record
            .config
            .insert(key_id.to_string(), ConfigItem::new(value, changed));
        increment_version(&mut record.config, changed)
    }

    pub fn set_service_info(&self, service_id: &str, key: &str, value: &str) {
        let mut services = self.services.write();
        services
            .entry(service_id.to_string())
            .or_default()
            .info
            .insert(key.to_string(), value.to_string());
    }

    /// Service info reported by clients; empty when none
    pub fn get_service_info(&self, service_id: &str) -> BTreeMap<String, String> {
        self.services
            .read()
            .get(service_id)
            .map(|r| r.info.clone())
            .unwrap_or_default()
    }

    /// Schema, config, live client payloads and info of one service.
    /// Fails with `NotFound` when the service never published a schema.
    pub fn service_view(&self, service_id: &str) -> Result<ServiceView, TopologyError> {
        let now = self.clock.now();
        let services = self.services.read();
        let record = services
            .get(service_id)
            .ok_or_else(|| TopologyError::NotFound(format!("/services/{}", service_id)))?;
        let schema = record
            .schema
            .clone()
            .ok_or_else(|| TopologyError::NotFound(format!("/services/{}/schema", service_id)))?;
        let clients = record
            .live_clients(now)
            .map(|(id, r)| (id.clone(), parse_payload(service_id, id, &r.payload)))
            .collect();
        Ok(ServiceView {
            schema,
            config: record.config.clone(),
            clients,
            info: record.info.clone(),
        })
    }

    fn snapshot_instances(&self, service_id: &str) -> Instances {
        let now = self.clock.now();
        let services = self.services.read();
        let Some(record) = services.get(service_id) else {
            debug!("No instances found for service {}", service_id);
            return Instances::new();
        };
        record
            .live_clients(now)
            .map(|(id, r)| {
                let payload = parse_payload(service_id, id, &r.payload);
                (id.clone(), RawSample::from_json(&payload))
            })
            .collect()
    }
}

impl TopologyProvider for MemoryStore {
    fn list_services(&self) -> StoreFuture<'_, Vec<ServiceId>> {
        Box::pin(async move { Ok(self.services.read().keys().cloned().collect()) })
    }

    fn list_instances<'a>(&'a self, service_id: &'a str) -> StoreFuture<'a, Instances> {
        Box::pin(async move { Ok(self.snapshot_instances(service_id)) })
    }
}

impl ConfigSource for MemoryStore {
    fn get_config<'a>(&'a self, service_id: &'a str) -> StoreFuture<'a, Config> {
        Box::pin(async move {
            Ok(self
                .services
                .read()
                .get(service_id)
                .map(|r| r.config.clone())
                .unwrap_or_default())
        })
    }

    fn set_schema<'a>(&'a self, service_id: &'a str, schema: &'a Schema) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.services
                .write()
                .entry(service_id.to_string())
                .or_default()
                .schema = Some(schema.clone());
            Ok(())
        })
    }
}

/// Unparsable payloads still count as a live instance, with no metrics.
fn parse_payload(service_id: &str, instance_id: &str, payload: &str) -> Value {
    serde_json::from_str(payload).unwrap_or_else(|e| {
        warn!(
            "Could not parse heartbeat of {}/{}: {} ({})",
            service_id, instance_id, payload, e
        );
        Value::Object(Default::default())
    })
}

/// Missing, non-numeric or exhausted versions restart, so the bump
/// yields "2".
fn increment_version(config: &mut Config, changed: i64) -> String {
    let next = config
        .get(VERSION_KEY)
        .and_then(|item| item.value.parse::<i64>().ok())
        .and_then(|current| current.checked_add(1))
        .unwrap_or(2)
        .to_string();
    config.insert(VERSION_KEY.to_string(), ConfigItem::new(next.clone(), changed));
    next
}
