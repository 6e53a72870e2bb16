// Collectors module - the capability contract every collector plugin
// implements, plus the plugin factory
//
// The core never depends on a specific source's types: it drives plugins
// exclusively through this trait. Each plugin polls one kind of source
// (a database, a queue manager, the local host) and records observations
// into the metric registry it is handed.

use async_trait::async_trait;
use std::error::Error;

use crate::config::{ConfigError, InstanceProperties};
use crate::registry::MetricRegistry;
use crate::resource::{ResourceAttributeFilter, ResourceEnricher};
use crate::store::RawMetric;

// Re-export all collector implementations
pub mod host;

/// Core trait that all collector plugins must implement.
///
/// # Lifecycle
/// The agent drives every instance through a fixed order:
/// 1. `initial_metric_catalog` (before any configuration is read)
/// 2. built-in parameter extraction
/// 3. `read_extra_parameters` (plugin-specific configuration intake)
/// 4. `init_once` (once per plugin kind, however many instances exist)
/// 5. `process_parameters` (may open connections, resolve metadata)
/// 6. instrument registration, then the polling loop calls `collect_data`
///
/// # Failure contract
/// `read_extra_parameters` and `process_parameters` may fail and abort
/// startup of that instance only. `collect_data` failures are caught by the
/// scheduler, logged, and reflected in the availability gauge; they never
/// stop the polling timer. Source I/O inside `collect_data` is expected to
/// carry its own timeout.
#[async_trait]
pub trait CollectorPlugin: Send + Sync {
    /// Short identifier of this plugin kind, used for logging, the plugin
    /// resource label and the once-per-kind initialization guard.
    fn kind(&self) -> &'static str;

    /// The static metric catalog this plugin records into. Called once per
    /// instance, before configuration is read.
    fn initial_metric_catalog(&self) -> Vec<RawMetric>;

    /// Name of the binary "source reachable" gauge the scheduler maintains
    /// around each collection cycle, if the catalog declares one.
    fn availability_metric(&self) -> Option<&str> {
        None
    }

    /// Plugin-specific configuration intake.
    fn read_extra_parameters(&mut self, _props: &InstanceProperties) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Process-wide one-time initialization, run exactly once per plugin
    /// kind regardless of how many instances are configured.
    async fn init_once(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Parameter processing that may reach out to the source (open
    /// connections, resolve metadata).
    async fn process_parameters(
        &mut self,
        _props: &InstanceProperties,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// One polling cycle: query the source and record observations into
    /// the registry.
    async fn collect_data(
        &self,
        registry: &MetricRegistry,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Adds plugin-specific labels (target host, tenant, database name) to
    /// the resource attached to every exported series.
    fn enrich_resource_attributes(&self, _enricher: &mut ResourceEnricher) {}

    /// Widens the allow filter deciding which resource attributes survive
    /// into the Prometheus exposition.
    fn prometheus_resource_filter(&self, default: ResourceAttributeFilter) -> ResourceAttributeFilter {
        default
    }
}

/// Instantiates the collector plugin for a configured kind.
///
/// # Adding New Collectors
/// To add a new source:
/// 1. Create a new module (e.g., `postgres.rs`)
/// 2. Implement the `CollectorPlugin` trait
/// 3. Add the module to the re-exports at the top of this file
/// 4. Add a match arm here
pub fn create_plugin(kind: &str) -> Option<Box<dyn CollectorPlugin>> {
    match kind {
        // Local host monitoring (load, memory, disk, network)
        host::PLUGIN_KIND => Some(Box::new(host::HostCollector::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_knows_host_plugin() {
        assert!(create_plugin("host").is_some());
        assert!(create_plugin("nonexistent").is_none());
    }
}
