//! Service Store
//!
//! The store holds, per service: the configuration schema, the current
//! configuration, the heartbeat payloads of live instances and free-form
//! service info. Two read seams are consumed by the rest of the crate:
//!
//! - [`TopologyProvider`]: which services exist and which instances report
//!   for a service (metrics exporters)
//! - [`ConfigSource`]: schema publication and config reads (config cache)
//!
//! Both are async through boxed futures so a networked backend can slot in
//! behind the same traits. [`MemoryStore`] is the in-process backend.

mod memory;

pub use memory::{MemoryStore, DEFAULT_INSTANCE_TTL};

use crate::metrics::RawSample;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Logical service name
pub type ServiceId = String;

/// One running process of a service
pub type InstanceId = String;

/// Live instances of a service with their parsed metric samples,
/// ordered by instance id
pub type Instances = BTreeMap<InstanceId, RawSample>;

/// Configuration schema of a service, keyed by config id
pub type Schema = BTreeMap<String, SchemaItem>;

/// Configuration values of a service, keyed by config id
pub type Config = BTreeMap<String, ConfigItem>;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TopologyError>> + Send + 'a>>;

/// Describes a single configuration option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaItem {
    pub default: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub title: String,
    pub description: String,
}

impl SchemaItem {
    pub fn new(
        default: impl Into<String>,
        value_type: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        SchemaItem {
            default: default.into(),
            value_type: value_type.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Configured value and the epoch second it last changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub value: String,
    pub changed: i64,
}

impl ConfigItem {
    pub fn new(value: impl Into<String>, changed: i64) -> Self {
        ConfigItem {
            value: value.into(),
            changed,
        }
    }
}

/// Response body of the service listing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceList {
    pub services: Vec<ServiceId>,
}

/// Everything the admin API shows for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceView {
    pub schema: Schema,
    pub config: Config,
    /// Raw heartbeat payloads of live instances
    pub clients: BTreeMap<InstanceId, serde_json::Value>,
    pub info: BTreeMap<String, String>,
}

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// Requested key does not exist
    NotFound(String),
    /// Backend could not be reached
    Unavailable(String),
    /// Stored data could not be encoded or decoded
    Malformed(String),
}

impl std::fmt::Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::NotFound(key) => write!(f, "Key not found: {}", key),
            TopologyError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            TopologyError::Malformed(msg) => write!(f, "Malformed store data: {}", msg),
        }
    }
}

impl std::error::Error for TopologyError {}

impl From<serde_json::Error> for TopologyError {
    fn from(e: serde_json::Error) -> Self {
        TopologyError::Malformed(e.to_string())
    }
}

/// Read access to the service/instance topology
pub trait TopologyProvider: Send + Sync + 'static {
    /// All known service ids
    fn list_services(&self) -> StoreFuture<'_, Vec<ServiceId>>;

    /// Live instances of `service_id`; empty (not an error) when none
    /// are registered
    fn list_instances<'a>(&'a self, service_id: &'a str) -> StoreFuture<'a, Instances>;
}

/// Schema publication and configuration reads for one service
pub trait ConfigSource: Send + Sync + 'static {
    /// Current configuration; empty when nothing has been configured yet
    fn get_config<'a>(&'a self, service_id: &'a str) -> StoreFuture<'a, Config>;

    /// Publish the schema of `service_id`, replacing any previous one
    fn set_schema<'a>(&'a self, service_id: &'a str, schema: &'a Schema) -> StoreFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_item_json_shape() {
        let item = SchemaItem::new("60", "integer", "Interval", "Seconds between polls");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "default": "60",
                "type": "integer",
                "title": "Interval",
                "description": "Seconds between polls",
            })
        );
        let parsed: SchemaItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            TopologyError::NotFound("/services/a/schema".to_string()).to_string(),
            "Key not found: /services/a/schema"
        );
        assert_eq!(
            TopologyError::Unavailable("connection refused".to_string()).to_string(),
            "Store unavailable: connection refused"
        );
    }
}
