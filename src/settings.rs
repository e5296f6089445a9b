//! Process settings
//!
//! Resolved in three layers, later ones winning:
//!
//! 1. Built-in defaults
//! 2. Optional TOML file (`CCENTRAL_CONFIG`, or the first CLI argument)
//! 3. Environment overrides:
//!    - `CCENTRAL_LISTEN`: bind address, e.g. `0.0.0.0:3000`
//!    - `CCENTRAL_PORT`: port only, keeps the bind host
//!    - `CCENTRAL_SERVICE_ID`: service id of this admin service's own config
//!    - `CCENTRAL_CHECK_INTERVAL`: config refresh interval, seconds
//!    - `CCENTRAL_INSTANCE_TTL`: instance heartbeat lifetime, seconds
//!
//! These are the settings needed before the store is reachable. Anything
//! an operator may change at runtime lives in the hot-reloaded service
//! config instead.

use crate::observability::LogSettings;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
pub const DEFAULT_SERVICE_ID: &str = "ccentral";

/// Error type for settings resolution
#[derive(Debug)]
pub enum SettingsError {
    /// Settings file could not be read
    Io { path: PathBuf, source: std::io::Error },
    /// Settings file is not valid TOML for [`FileSettings`]
    Parse { path: PathBuf, source: toml::de::Error },
    /// A value (file or environment) is out of domain
    Invalid { key: &'static str, value: String },
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Io { path, source } => {
                write!(f, "Cannot read settings file {}: {}", path.display(), source)
            }
            SettingsError::Parse { path, source } => {
                write!(f, "Cannot parse settings file {}: {}", path.display(), source)
            }
            SettingsError::Invalid { key, value } => {
                write!(f, "Invalid value for {}: {:?}", key, value)
            }
        }
    }
}

impl std::error::Error for SettingsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SettingsError::Io { source, .. } => Some(source),
            SettingsError::Parse { source, .. } => Some(source),
            SettingsError::Invalid { .. } => None,
        }
    }
}

/// On-disk form; every field optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub listen: Option<String>,
    pub service_id: Option<String>,
    /// Seconds
    pub check_interval: Option<u64>,
    /// Seconds
    pub instance_ttl: Option<u64>,
    pub log_filter: Option<String>,
    pub log_json: Option<bool>,
}

/// Resolved process settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub service_id: String,
    pub check_interval: Duration,
    pub instance_ttl: Duration,
    pub log: LogSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            service_id: DEFAULT_SERVICE_ID.to_string(),
            check_interval: crate::config::DEFAULT_CHECK_INTERVAL,
            instance_ttl: crate::store::DEFAULT_INSTANCE_TTL,
            log: LogSettings::default(),
        }
    }
}

impl ServerSettings {
    /// Resolve from the process environment and command line
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var("CCENTRAL_CONFIG")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::args().nth(1).map(PathBuf::from));
        Self::resolve(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Resolve from an optional file and an environment lookup
    pub fn resolve<F>(path: Option<&Path>, env: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = ServerSettings {
            log: LogSettings::from_lookup(&env),
            ..ServerSettings::default()
        };
        if let Some(path) = path {
            settings.apply_file(&read_file(path)?)?;
        }
        settings.apply_env(&env)?;
        Ok(settings)
    }

    fn apply_file(&mut self, file: &FileSettings) -> Result<(), SettingsError> {
        if let Some(listen) = &file.listen {
            self.listen = parse_listen("listen", listen)?;
        }
        if let Some(service_id) = &file.service_id {
            self.service_id = non_empty("service_id", service_id)?;
        }
        if let Some(secs) = file.check_interval {
            self.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = file.instance_ttl {
            self.instance_ttl = positive_secs("instance_ttl", secs)?;
        }
        if let Some(filter) = &file.log_filter {
            self.log.filter = filter.clone();
        }
        if let Some(json) = file.log_json {
            self.log.json = json;
        }
        Ok(())
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = env("CCENTRAL_LISTEN") {
            self.listen = parse_listen("CCENTRAL_LISTEN", &listen)?;
        }
        if let Some(port) = env("CCENTRAL_PORT") {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("CCENTRAL_PORT", &port))?;
            self.listen.set_port(port);
        }
        if let Some(service_id) = env("CCENTRAL_SERVICE_ID") {
            self.service_id = non_empty("CCENTRAL_SERVICE_ID", &service_id)?;
        }
        if let Some(secs) = env("CCENTRAL_CHECK_INTERVAL") {
            let secs = parse_secs("CCENTRAL_CHECK_INTERVAL", &secs)?;
            self.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env("CCENTRAL_INSTANCE_TTL") {
            let secs = parse_secs("CCENTRAL_INSTANCE_TTL", &secs)?;
            self.instance_ttl = positive_secs("CCENTRAL_INSTANCE_TTL", secs)?;
        }
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileSettings, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn invalid(key: &'static str, value: &str) -> SettingsError {
    SettingsError::Invalid {
        key,
        value: value.to_string(),
    }
}

fn parse_listen(key: &'static str, value: &str) -> Result<SocketAddr, SettingsError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, SettingsError> {
    value.parse().map_err(|_| invalid(key, value))
}

fn positive_secs(key: &'static str, secs: u64) -> Result<Duration, SettingsError> {
    if secs == 0 {
        return Err(invalid(key, "0"));
    }
    Ok(Duration::from_secs(secs))
}

fn non_empty(key: &'static str, value: &str) -> Result<String, SettingsError> {
    if value.is_empty() {
        return Err(invalid(key, value));
    }
    Ok(value.to_string())
}
