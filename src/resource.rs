// Resource attributes - the process/target-identifying labels attached to
// every exported series
//
// The enricher accumulates attributes from three layers: the agent's own
// identity (service name, SDK identity), values merged from the
// OTEL_RESOURCE_ATTRIBUTES environment variable, and plugin-specific labels
// (plugin name, target host, tenant) added through the plugin contract.

use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::resource::{
    HOST_NAME, SERVICE_INSTANCE_ID, SERVICE_NAME, TELEMETRY_SDK_LANGUAGE, TELEMETRY_SDK_NAME,
    TELEMETRY_SDK_VERSION,
};
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;

use crate::model::AttributeValue;

/// Resource attribute naming the collector plugin a series came from.
pub const PLUGIN_ATTRIBUTE: &str = "plugin";

/// Environment variable holding extra `k=v` resource attributes.
pub const RESOURCE_ATTRIBUTES_ENV: &str = "OTEL_RESOURCE_ATTRIBUTES";

/// Predicate deciding which resource attributes survive into the Prometheus
/// exposition as labels.
pub type ResourceAttributeFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Accumulates resource attributes for one collector instance.
///
/// Later values for the same key replace earlier ones, so plugin enrichment
/// can override defaults. Keys are kept sorted for deterministic output.
#[derive(Debug, Default, Clone)]
pub struct ResourceEnricher {
    attributes: BTreeMap<String, AttributeValue>,
}

impl ResourceEnricher {
    pub fn new() -> Self {
        ResourceEnricher::default()
    }

    /// Adds or replaces one attribute.
    pub fn enrich(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Adds one attribute when a value is present; `None` is skipped.
    pub fn enrich_opt(&mut self, key: impl Into<String>, value: Option<impl Into<AttributeValue>>) {
        if let Some(value) = value {
            self.enrich(key, value);
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    /// Converts the accumulated attributes into OpenTelemetry key/values.
    pub fn to_key_values(&self) -> Vec<KeyValue> {
        self.attributes
            .iter()
            .map(|(key, value)| value.to_key_value(key))
            .collect()
    }
}

/// Builds the base resource for an instance: service identity plus SDK
/// identity, then the environment merge.
pub fn base_enricher(service_name: &str, service_instance_id: Option<&str>) -> ResourceEnricher {
    let mut enricher = ResourceEnricher::new();
    enricher.enrich(SERVICE_NAME, service_name);
    enricher.enrich(TELEMETRY_SDK_NAME, "telemetry-collector");
    enricher.enrich(TELEMETRY_SDK_LANGUAGE, "rust");
    enricher.enrich(TELEMETRY_SDK_VERSION, env!("CARGO_PKG_VERSION"));
    enricher.enrich_opt(SERVICE_INSTANCE_ID, service_instance_id);
    merge_env_attributes(&mut enricher);
    enricher
}

/// Merges `OTEL_RESOURCE_ATTRIBUTES` (comma-separated `k=v` pairs) into the
/// enricher. Malformed pairs are skipped.
pub fn merge_env_attributes(enricher: &mut ResourceEnricher) {
    let Ok(raw) = env::var(RESOURCE_ATTRIBUTES_ENV) else {
        return;
    };
    for pair in raw.split(',') {
        let mut parts = pair.splitn(2, '=');
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        enricher.enrich(key, value);
    }
}

/// The default allow filter for the Prometheus path: only the plugin label
/// and the host name survive as labels. Plugins widen this through the
/// collector contract when a target-identifying label (a queue manager or
/// database name) must be kept.
pub fn default_prometheus_attribute_filter() -> ResourceAttributeFilter {
    Arc::new(|key: &str| key == PLUGIN_ATTRIBUTE || key == HOST_NAME)
}

/// Local host name, when the platform exposes one.
pub fn hostname() -> Option<String> {
    sysinfo::System::host_name()
}
