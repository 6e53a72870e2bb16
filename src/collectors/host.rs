// Host collector - polls the local machine
//
// Collects load averages, memory and swap usage, per-mount disk usage and
// per-interface network throughput. Serves as the bundled reference
// implementation of the collector contract; remote-source plugins
// (databases, queue managers) follow the same shape.

use async_trait::async_trait;
use opentelemetry_semantic_conventions::resource::{HOST_NAME, OS_TYPE};
use std::error::Error;
use std::sync::Arc;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

use super::CollectorPlugin;
use crate::model::MetricQueryResult;
use crate::registry::MetricRegistry;
use crate::resource::{hostname, ResourceAttributeFilter, ResourceEnricher, PLUGIN_ATTRIBUTE};
use crate::store::{CalculationMode, InstrumentKind, RawMetric};

pub const PLUGIN_KIND: &str = "host";

/* Metric catalog:
 */
pub const HOST_STATUS: &str = "host.status";
pub const CPU_LOAD_1M: &str = "system.cpu.load.1m";
pub const CPU_LOAD_5M: &str = "system.cpu.load.5m";
pub const CPU_LOAD_15M: &str = "system.cpu.load.15m";
pub const CPU_COUNT: &str = "system.cpu.logical.count";
pub const MEMORY_USAGE: &str = "system.memory.usage";
pub const SWAP_USAGE: &str = "system.swap.usage";
pub const DISK_USAGE: &str = "system.disk.usage";
pub const DISK_UTILIZATION: &str = "system.disk.utilization";
pub const NETWORK_IO_RATE: &str = "system.network.io.rate";

/// Local host metric collector.
///
/// Stateless: fresh system snapshots are taken on every cycle so the
/// reported values are always current.
pub struct HostCollector;

impl HostCollector {
    pub fn new() -> Self {
        HostCollector
    }

    /// Memory and swap readings as per-state series.
    fn memory_results(sys: &System) -> (Vec<MetricQueryResult>, Vec<MetricQueryResult>) {
        let used = sys.used_memory();
        let free = sys.free_memory();
        let available = sys.available_memory();

        let memory = vec![
            MetricQueryResult::new(used as i64)
                .with_key("used")
                .with_attribute("state", "used"),
            MetricQueryResult::new(free as i64)
                .with_key("free")
                .with_attribute("state", "free"),
            MetricQueryResult::new(available as i64)
                .with_key("available")
                .with_attribute("state", "available"),
        ];

        let swap = vec![
            MetricQueryResult::new(sys.used_swap() as i64)
                .with_key("used")
                .with_attribute("state", "used"),
            MetricQueryResult::new(sys.free_swap() as i64)
                .with_key("free")
                .with_attribute("state", "free"),
        ];

        (memory, swap)
    }

    /// One usage and one utilization result per mounted filesystem.
    fn disk_results(disks: &Disks) -> (Vec<MetricQueryResult>, Vec<MetricQueryResult>) {
        let mut usage = Vec::new();
        let mut utilization = Vec::new();

        for disk in disks.list() {
            let mount_point = disk.mount_point().to_string_lossy().to_string();
            let filesystem = disk.file_system().to_string_lossy().to_string();
            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);

            usage.push(
                MetricQueryResult::new(used as i64)
                    .with_key(mount_point.as_str())
                    .with_attribute("mountpoint", mount_point.clone())
                    .with_attribute("type", filesystem),
            );

            if total > 0 {
                utilization.push(
                    MetricQueryResult::new(used as f64 / total as f64)
                        .with_key(mount_point.as_str())
                        .with_attribute("mountpoint", mount_point.clone()),
                );
            }
        }

        (usage, utilization)
    }

    /// Cumulative per-interface byte totals; the metric is rate-derived, so
    /// consecutive cycles turn these into bytes per second.
    fn network_results(networks: &Networks) -> Vec<MetricQueryResult> {
        let mut results = Vec::new();
        for (interface, data) in networks.iter() {
            results.push(
                MetricQueryResult::new(data.total_received() as i64)
                    .with_key(format!("{}/receive", interface))
                    .with_attribute("device", interface.clone())
                    .with_attribute("direction", "receive"),
            );
            results.push(
                MetricQueryResult::new(data.total_transmitted() as i64)
                    .with_key(format!("{}/transmit", interface))
                    .with_attribute("device", interface.clone())
                    .with_attribute("direction", "transmit"),
            );
        }
        results
    }
}

#[async_trait]
impl CollectorPlugin for HostCollector {
    fn kind(&self) -> &'static str {
        PLUGIN_KIND
    }

    fn initial_metric_catalog(&self) -> Vec<RawMetric> {
        vec![
            RawMetric::new(InstrumentKind::Gauge, HOST_STATUS, "The status of the host", "{status}", true),
            RawMetric::new(InstrumentKind::Gauge, CPU_LOAD_1M, "Average system load over 1 minute", "1", false),
            RawMetric::new(InstrumentKind::Gauge, CPU_LOAD_5M, "Average system load over 5 minutes", "1", false),
            RawMetric::new(InstrumentKind::Gauge, CPU_LOAD_15M, "Average system load over 15 minutes", "1", false),
            RawMetric::new(InstrumentKind::Gauge, CPU_COUNT, "Number of logical processors", "{cpu}", true),
            RawMetric::new(InstrumentKind::Gauge, MEMORY_USAGE, "Physical memory by state", "By", true),
            RawMetric::new(InstrumentKind::Gauge, SWAP_USAGE, "Swap space by state", "By", true),
            RawMetric::new(InstrumentKind::Gauge, DISK_USAGE, "Filesystem space in use", "By", true),
            RawMetric::new(InstrumentKind::Gauge, DISK_UTILIZATION, "Fraction of filesystem space in use", "1", false),
            RawMetric::new(InstrumentKind::Gauge, NETWORK_IO_RATE, "Network throughput per interface", "By", false)
                .with_calculation_mode(CalculationMode::Rate),
        ]
    }

    fn availability_metric(&self) -> Option<&str> {
        Some(HOST_STATUS)
    }

    async fn collect_data(
        &self,
        registry: &MetricRegistry,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        debug!("Collecting host metrics");

        // Load averages are zero on platforms without the concept.
        let load = System::load_average();
        registry.set_value(CPU_LOAD_1M, load.one);
        registry.set_value(CPU_LOAD_5M, load.five);
        registry.set_value(CPU_LOAD_15M, load.fifteen);
        registry.set_value(CPU_COUNT, num_cpus::get() as i64);

        let mut sys = System::new();
        sys.refresh_memory();
        let (memory, swap) = Self::memory_results(&sys);
        registry.set_results(MEMORY_USAGE, &memory);
        registry.set_results(SWAP_USAGE, &swap);

        let disks = Disks::new_with_refreshed_list();
        let (usage, utilization) = Self::disk_results(&disks);
        registry.set_results(DISK_USAGE, &usage);
        registry.set_results(DISK_UTILIZATION, &utilization);

        let networks = Networks::new_with_refreshed_list();
        registry.set_results(NETWORK_IO_RATE, &Self::network_results(&networks));

        Ok(())
    }

    fn enrich_resource_attributes(&self, enricher: &mut ResourceEnricher) {
        enricher.enrich(PLUGIN_ATTRIBUTE, PLUGIN_KIND);
        enricher.enrich(OS_TYPE, std::env::consts::OS);
        enricher.enrich_opt(HOST_NAME, hostname());
    }

    fn prometheus_resource_filter(&self, default: ResourceAttributeFilter) -> ResourceAttributeFilter {
        Arc::new(move |key: &str| default(key) || key == OS_TYPE)
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricFilter;

    #[test]
    fn test_catalog_declares_availability_metric() {
        let collector = HostCollector::new();
        let catalog = collector.initial_metric_catalog();
        let status = collector.availability_metric().unwrap();
        assert!(catalog.iter().any(|metric| metric.name() == status));
    }

    #[test]
    fn test_network_metric_is_rate_derived() {
        let catalog = HostCollector::new().initial_metric_catalog();
        let network = catalog
            .iter()
            .find(|metric| metric.name() == NETWORK_IO_RATE)
            .unwrap();
        assert_eq!(network.calculation_mode(), CalculationMode::Rate);
    }

    #[tokio::test]
    async fn test_collect_populates_memory_series() {
        let collector = HostCollector::new();
        let registry = MetricRegistry::new(collector.initial_metric_catalog(), MetricFilter::allow_all());

        collector.collect_data(&registry).await.unwrap();

        let memory = registry.raw_metric(MEMORY_USAGE).unwrap();
        assert!(memory.data_point_count() >= 3);
        let load = registry.raw_metric(CPU_LOAD_1M).unwrap();
        assert_eq!(load.data_point_count(), 1);
    }

    #[test]
    fn test_widened_filter_keeps_os_type() {
        let collector = HostCollector::new();
        let filter =
            collector.prometheus_resource_filter(crate::resource::default_prometheus_attribute_filter());
        assert!(filter(OS_TYPE));
        assert!(filter(PLUGIN_ATTRIBUTE));
        assert!(!filter("service.name"));
    }
}
