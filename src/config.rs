// Configuration module - loads the agent's YAML document and exposes
// typed access to per-instance settings
//
// This module is responsible for:
// 1. Resolving and reading the configuration file
// 2. Parsing the instance list (each instance is a flat key/value map)
// 3. Extracting the built-in keys with their documented defaults
// 4. Leaving plugin-specific keys accessible to the collector plugins

use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::export::TransportSelection;

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "CONFIG";

/// Default configuration file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/* Built-in instance keys:
 */
pub const POLL_INTERVAL: &str = "otel.poll.interval"; // Polling interval in seconds
pub const CALLBACK_INTERVAL: &str = "otel.callback.interval"; // Push-read interval in seconds
pub const BACKEND_URL: &str = "otel.backend.url"; // URL of the OTLP backend
pub const TRANSPORT: &str = "otel.transport"; // Export transport selection
pub const TRANSPORT_TIMEOUT: &str = "otel.transport.timeout"; // Per-call timeout in milliseconds
pub const TRANSPORT_DELAY: &str = "otel.transport.delay"; // Batch scheduling delay in milliseconds
pub const RESTRICTED_METRICS: &str = "otel.restricted.metrics"; // Comma-separated suppression list
pub const PROMETHEUS_HOST: &str = "prometheus.host";
pub const PROMETHEUS_PORT: &str = "prometheus.port";
pub const PROMETHEUS_RESTRICTED_METRICS: &str = "prometheus.restricted.metrics";
pub const SERVICE_NAME: &str = "otel.service.name";
pub const SERVICE_INSTANCE_ID: &str = "otel.service.instance.id";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 25;
pub const DEFAULT_CALLBACK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:4318";
pub const DEFAULT_TRANSPORT: &str = "http";
pub const DEFAULT_TRANSPORT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TRANSPORT_DELAY_MS: u64 = 100;
pub const DEFAULT_PROMETHEUS_HOST: &str = "0.0.0.0";
pub const DEFAULT_PROMETHEUS_PORT: u16 = 16543;
pub const DEFAULT_SERVICE_NAME: &str = "telemetry-collector";

/// Errors that can occur while loading or interpreting configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for '{key}': expected {expected}")]
    InvalidValue { key: String, expected: &'static str },

    #[error("invalid transport selection: {0}")]
    Transport(String),

    #[error("missing required setting: {0}")]
    MissingRequiredSetting(String),
}

/// The agent's configuration document.
///
/// # Example
/// ```yaml
/// plugin: host
/// instances:
///   - otel.poll.interval: 25
///     otel.backend.url: "http://otel-backend:4318"
///     otel.transport: "http,prometheus"
///     prometheus.port: 16543
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Which collector plugin the configured instances run.
    #[serde(default = "default_plugin")]
    pub plugin: String,

    /// One entry per collector instance; built-in and plugin-specific keys
    /// share the same flat map.
    #[serde(default)]
    pub instances: Vec<InstanceProperties>,
}

fn default_plugin() -> String {
    "host".to_string()
}

/// Resolves the configuration file path from the CLI flag, the environment
/// variable, or the default location, in that order.
pub fn resolve_config_path(cli_path: Option<String>) -> PathBuf {
    if let Some(path) = cli_path {
        return PathBuf::from(path);
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// Reads and parses the configuration document.
pub fn load_config(path: &Path) -> Result<AgentConfig, ConfigError> {
    info!("Loading configuration from: {}", path.display());
    let raw = std::fs::read_to_string(path)?;
    let config: AgentConfig = serde_yaml::from_str(&raw)?;
    info!(
        "Loaded configuration for plugin '{}' with {} instance(s)",
        config.plugin,
        config.instances.len()
    );
    Ok(config)
}

/// The flat key/value map configured for one collector instance.
///
/// Built-in keys are consumed by [`InstanceSettings::from_properties`];
/// everything else is plugin-specific and read through the typed accessors
/// during the plugin's parameter intake.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct InstanceProperties {
    values: HashMap<String, serde_yaml::Value>,
}

impl InstanceProperties {
    pub fn from_map(values: HashMap<String, serde_yaml::Value>) -> Self {
        InstanceProperties { values }
    }

    /// Inserts one value, mainly for tests and programmatic setup.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns a string value. Scalars of other types are stringified so
    /// that unquoted YAML numbers remain usable where text is expected.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some(serde_yaml::Value::String(s)) => Some(s.clone()),
            Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
            Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.values.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::Number(n)) => {
                n.as_u64().map(Some).ok_or(ConfigError::InvalidValue {
                    key: key.to_string(),
                    expected: "a non-negative integer",
                })
            }
            Some(_) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                expected: "a non-negative integer",
            }),
        }
    }

    pub fn get_u16(&self, key: &str) -> Result<Option<u16>, ConfigError> {
        match self.get_u64(key)? {
            None => Ok(None),
            Some(v) => u16::try_from(v).map(Some).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                expected: "an integer between 0 and 65535",
            }),
        }
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.values.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::Number(n)) => Ok(n.as_f64()),
            Some(_) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                expected: "a number",
            }),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.values.get(key) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                expected: "a boolean",
            }),
        }
    }

    /// Returns a string value or the given default.
    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }
}

/// Splits a comma-separated restriction list into trimmed names.
fn parse_restrictions(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|list| {
        list.split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    })
}

/// The built-in settings of one collector instance, with defaults applied.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    /// Fixed delay between collection cycles.
    pub poll_interval: Duration,

    /// Interval of the push-export read timer, independent of polling.
    pub callback_interval: Duration,

    /// OTLP backend base URL, normalized (no signal path suffix).
    pub backend_url: String,

    /// Which export transports are active.
    pub transport: TransportSelection,

    /// Per-call export timeout.
    pub transport_timeout: Duration,

    /// Scheduling delay of the batch span/log processors.
    pub transport_delay: Duration,

    pub prometheus_host: String,
    pub prometheus_port: u16,

    /// Metric names suppressed on every export path.
    pub metric_restrictions: Option<Vec<String>>,

    /// Metric names suppressed on the Prometheus path only.
    pub prometheus_metric_restrictions: Option<Vec<String>>,

    pub service_name: String,
    pub service_instance_id: Option<String>,
}

impl InstanceSettings {
    /// Extracts the built-in keys from an instance map, applying defaults
    /// for everything absent.
    pub fn from_properties(props: &InstanceProperties) -> Result<Self, ConfigError> {
        let transport_raw = props.get_str_or(TRANSPORT, DEFAULT_TRANSPORT);
        let transport =
            TransportSelection::parse(&transport_raw).map_err(ConfigError::Transport)?;

        let backend_url = crate::export::normalize_backend_url(
            &props.get_str_or(BACKEND_URL, DEFAULT_BACKEND_URL),
        );

        Ok(InstanceSettings {
            poll_interval: Duration::from_secs(
                props.get_u64(POLL_INTERVAL)?.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            callback_interval: Duration::from_secs(
                props
                    .get_u64(CALLBACK_INTERVAL)?
                    .unwrap_or(DEFAULT_CALLBACK_INTERVAL_SECS),
            ),
            backend_url,
            transport,
            transport_timeout: Duration::from_millis(
                props
                    .get_u64(TRANSPORT_TIMEOUT)?
                    .unwrap_or(DEFAULT_TRANSPORT_TIMEOUT_MS),
            ),
            transport_delay: Duration::from_millis(
                props
                    .get_u64(TRANSPORT_DELAY)?
                    .unwrap_or(DEFAULT_TRANSPORT_DELAY_MS),
            ),
            prometheus_host: props.get_str_or(PROMETHEUS_HOST, DEFAULT_PROMETHEUS_HOST),
            prometheus_port: props
                .get_u16(PROMETHEUS_PORT)?
                .unwrap_or(DEFAULT_PROMETHEUS_PORT),
            metric_restrictions: parse_restrictions(props.get_str(RESTRICTED_METRICS)),
            prometheus_metric_restrictions: parse_restrictions(
                props.get_str(PROMETHEUS_RESTRICTED_METRICS),
            ),
            service_name: props.get_str_or(SERVICE_NAME, DEFAULT_SERVICE_NAME),
            service_instance_id: props.get_str(SERVICE_INSTANCE_ID),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_applied_for_empty_instance() {
        let settings = InstanceSettings::from_properties(&InstanceProperties::default()).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(25));
        assert_eq!(settings.callback_interval, Duration::from_secs(30));
        assert_eq!(settings.backend_url, DEFAULT_BACKEND_URL);
        assert!(settings.transport.http);
        assert!(!settings.transport.grpc);
        assert!(!settings.transport.prometheus);
        assert_eq!(settings.prometheus_port, DEFAULT_PROMETHEUS_PORT);
        assert_eq!(settings.service_name, DEFAULT_SERVICE_NAME);
        assert!(settings.metric_restrictions.is_none());
    }

    #[test]
    fn test_parse_full_document() {
        let doc = r#"
plugin: host
instances:
  - otel.poll.interval: 5
    otel.callback.interval: 10
    otel.backend.url: "http://backend:4317/v1/metrics"
    otel.transport: "grpc,prometheus"
    otel.restricted.metrics: "system.cpu.load.1m, system.cpu.load.5m"
    prometheus.host: "127.0.0.1"
    prometheus.port: 9464
    otel.service.name: "edge-agent"
    otel.service.instance.id: "edge-1"
"#;
        let config: AgentConfig = serde_yaml::from_str(doc).unwrap();
        assert_eq!(config.plugin, "host");
        assert_eq!(config.instances.len(), 1);

        let settings = InstanceSettings::from_properties(&config.instances[0]).unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        // The signal suffix is stripped from the backend URL.
        assert_eq!(settings.backend_url, "http://backend:4317");
        assert!(settings.transport.grpc);
        assert!(settings.transport.prometheus);
        assert!(!settings.transport.http);
        assert_eq!(settings.prometheus_host, "127.0.0.1");
        assert_eq!(settings.prometheus_port, 9464);
        assert_eq!(
            settings.metric_restrictions,
            Some(vec![
                "system.cpu.load.1m".to_string(),
                "system.cpu.load.5m".to_string()
            ])
        );
        assert_eq!(settings.service_instance_id.as_deref(), Some("edge-1"));
    }

    #[test]
    fn test_plugin_specific_keys_stay_accessible() {
        let doc = r#"
instances:
  - db.address: "10.0.0.5"
    db.port: 5236
    db.secured: true
"#;
        let config: AgentConfig = serde_yaml::from_str(doc).unwrap();
        let props = &config.instances[0];
        assert_eq!(props.get_str("db.address").as_deref(), Some("10.0.0.5"));
        assert_eq!(props.get_u64("db.port").unwrap(), Some(5236));
        assert_eq!(props.get_bool("db.secured").unwrap(), Some(true));
        assert!(props.get_str("db.missing").is_none());
    }

    #[test]
    fn test_invalid_type_is_rejected() {
        let mut props = InstanceProperties::default();
        props.insert(POLL_INTERVAL, "often");
        assert!(matches!(
            InstanceSettings::from_properties(&props),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        let mut props = InstanceProperties::default();
        props.insert(TRANSPORT, "carrier-pigeon");
        assert!(matches!(
            InstanceSettings::from_properties(&props),
            Err(ConfigError::Transport(_))
        ));
    }
}
