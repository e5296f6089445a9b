//! Hot-Reloaded Service Configuration
//!
//! [`ConfigCache`] gives typed access to one service's configuration as
//! stored in a [`ConfigSource`]. Values are refreshed lazily: a read
//! triggers a reload once `check_interval` has passed since the last one.
//! The first reload also publishes the registered schema, so the admin UI
//! can show and edit the options.
//!
//! Lookup order for a key: configured non-empty value, then the schema
//! default. Keys without a registered schema are an error.

use crate::clock::{Clock, UnixTimestamp};
use crate::store::{Config, ConfigSource, Schema, SchemaItem, TopologyError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default time between configuration reloads
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);

pub const ZABBIX_ENABLED: &str = "zabbix_enabled";
pub const ZABBIX_HOST: &str = "zabbix_host";
pub const ZABBIX_PORT: &str = "zabbix_port";
pub const ZABBIX_INTERVAL: &str = "zabbix_interval";
pub const PROMETHEUS_ENABLED: &str = "prometheus_enabled";

/// Error type for configuration lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No schema registered for the key
    SchemaMissing(String),
    /// Value is not a boolean
    InvalidBool { key: String, value: String },
    /// Value is not a base-10 integer
    InvalidInt { key: String, value: String },
    /// Reload from the store failed
    Store(TopologyError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::SchemaMissing(key) => {
                write!(f, "Schema has not been defined for option {}", key)
            }
            ConfigError::InvalidBool { key, value } => {
                write!(f, "Option {} is not a boolean: {:?}", key, value)
            }
            ConfigError::InvalidInt { key, value } => {
                write!(f, "Option {} is not an integer: {:?}", key, value)
            }
            ConfigError::Store(e) => write!(f, "Configuration could not be loaded: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<TopologyError> for ConfigError {
    fn from(e: TopologyError) -> Self {
        ConfigError::Store(e)
    }
}

struct CacheState {
    schema: Schema,
    config: Config,
    /// `None` until the first reload attempt
    last_check: Option<UnixTimestamp>,
}

/// Typed, lazily refreshed view of one service's configuration
pub struct ConfigCache {
    service_id: String,
    source: Arc<dyn ConfigSource>,
    clock: Arc<dyn Clock>,
    check_interval: Duration,
    state: Mutex<CacheState>,
}

impl ConfigCache {
    pub fn new(
        service_id: impl Into<String>,
        source: Arc<dyn ConfigSource>,
        clock: Arc<dyn Clock>,
        check_interval: Duration,
    ) -> Self {
        ConfigCache {
            service_id: service_id.into(),
            source,
            clock,
            check_interval,
            state: Mutex::new(CacheState {
                schema: Schema::new(),
                config: Config::new(),
                last_check: None,
            }),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Register one option. Must happen before the first read so the
    /// schema is published with it.
    pub fn add_schema(
        &self,
        config_id: &str,
        default: &str,
        value_type: &str,
        title: &str,
        description: &str,
    ) {
        self.state.lock().schema.insert(
            config_id.to_string(),
            SchemaItem::new(default, value_type, title, description),
        );
    }

    /// Reload if `check_interval` has passed since the last attempt
    pub async fn update_config(&self) -> Result<(), ConfigError> {
        let now = self.clock.now();
        let last_check = self.state.lock().last_check;
        let stale = match last_check {
            None => true,
            Some(last) => now.saturating_sub(last) > self.check_interval,
        };
        if stale {
            self.force_update_config().await
        } else {
            Ok(())
        }
    }

    /// Reload unconditionally. The first attempt publishes the schema;
    /// every attempt stamps the check time, successful or not.
    pub async fn force_update_config(&self) -> Result<(), ConfigError> {
        let (first, schema) = {
            let state = self.state.lock();
            (state.last_check.is_none(), state.schema.clone())
        };

        if first {
            if let Err(e) = self.source.set_schema(&self.service_id, &schema).await {
                self.state.lock().last_check = Some(self.clock.now());
                return Err(e.into());
            }
            debug!("Published schema for {} ({} options)", self.service_id, schema.len());
        }

        let result = self.source.get_config(&self.service_id).await;
        let mut state = self.state.lock();
        state.last_check = Some(self.clock.now());
        state.config = result?;
        Ok(())
    }

    /// Raw string value of `config_id`
    pub async fn get_string(&self, config_id: &str) -> Result<String, ConfigError> {
        if let Err(e) = self.update_config().await {
            warn!("Using cached configuration for {}: {}", self.service_id, e);
        }
        let state = self.state.lock();
        let default = state
            .schema
            .get(config_id)
            .ok_or_else(|| ConfigError::SchemaMissing(config_id.to_string()))?;
        match state.config.get(config_id) {
            Some(item) if !item.value.is_empty() => Ok(item.value.clone()),
            _ => Ok(default.default.clone()),
        }
    }

    pub async fn get_bool(&self, config_id: &str) -> Result<bool, ConfigError> {
        let value = self.get_string(config_id).await?;
        parse_bool(&value).ok_or(ConfigError::InvalidBool {
            key: config_id.to_string(),
            value,
        })
    }

    pub async fn get_int(&self, config_id: &str) -> Result<i64, ConfigError> {
        let value = self.get_string(config_id).await?;
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: config_id.to_string(),
            value,
        })
    }
}

/// Register the options read by the metrics exporters
pub fn register_exporter_schema(cache: &ConfigCache) {
    cache.add_schema(
        ZABBIX_ENABLED,
        "false",
        "boolean",
        "Zabbix enabled",
        "Push aggregated instance metrics to a Zabbix trapper",
    );
    cache.add_schema(
        ZABBIX_HOST,
        "127.0.0.1",
        "string",
        "Zabbix host",
        "Host of the Zabbix server or proxy",
    );
    cache.add_schema(
        ZABBIX_PORT,
        "10051",
        "integer",
        "Zabbix port",
        "Trapper port of the Zabbix server or proxy",
    );
    cache.add_schema(
        ZABBIX_INTERVAL,
        "60",
        "integer",
        "Zabbix interval",
        "Seconds between pushes",
    );
    cache.add_schema(
        PROMETHEUS_ENABLED,
        "true",
        "boolean",
        "Prometheus enabled",
        "Serve aggregated instance metrics on /metrics",
    );
}

/// Accepts 1, t, T, TRUE, true, True, 0, f, F, FALSE, false, False
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
