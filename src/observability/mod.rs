//! Logging setup
//!
//! Settings come from the environment:
//! - `CCENTRAL_LOG`: filter directives, e.g. `info,ccentral::export=debug`.
//!   Falls back to `RUST_LOG`, then `info`.
//! - `CCENTRAL_LOG_JSON`: `true` or `1` for JSON lines

use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directives
    pub filter: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

impl LogSettings {
    /// Load from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        LogSettings {
            filter: env("CCENTRAL_LOG")
                .or_else(|| env("RUST_LOG"))
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            json: env("CCENTRAL_LOG_JSON")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Install the global subscriber. Bad filter directives fall back to the
/// default filter; a second call reports the existing subscriber as an
/// error.
pub fn init_tracing(
    settings: &LogSettings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (filter, rejected) = match EnvFilter::try_new(&settings.filter) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(DEFAULT_LOG_FILTER), Some(e)),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.json {
        builder.json().try_init()?;
    } else {
        builder.try_init()?;
    }

    if let Some(e) = rejected {
        tracing::warn!("Ignoring log filter {:?}: {}", settings.filter, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_settings_lookup_order() {
        let settings = LogSettings::from_lookup(|key| match key {
            "CCENTRAL_LOG" => Some("debug".to_string()),
            "RUST_LOG" => Some("trace".to_string()),
            _ => None,
        });
        assert_eq!(settings.filter, "debug");

        let settings = LogSettings::from_lookup(|key| match key {
            "RUST_LOG" => Some("warn".to_string()),
            "CCENTRAL_LOG_JSON" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(settings.filter, "warn");
        assert!(settings.json);

        assert_eq!(LogSettings::from_lookup(|_| None), LogSettings::default());
    }
}
