// Scrape readers - the pull-export path
//
// A ScrapeReader belongs to one collector instance: on every scrape it runs
// the purge-then-emit pass over the instance's registered metrics and turns
// the result into exposition snapshots, labelled with the instance's
// filtered resource attributes. The MergedScrapeReader is shared by all
// instances behind the process-wide listener and folds their snapshots into
// one coherent document.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::error;

use crate::model::AttributeValue;
use crate::registry::MetricRegistry;
use crate::resource::ResourceAttributeFilter;
use crate::store::InstrumentKind;

use super::snapshot::{
    merge_snapshots, sanitize_label_name, sanitize_metric_name, HistogramPoint, Labels,
    MetricSnapshot, NumberPoint, SnapshotMetadata, SnapshotPoints,
};

/// Per-instance scrape reader.
pub struct ScrapeReader {
    registry: Arc<MetricRegistry>,

    /// Resource attributes that survived the allow filter, pre-sanitized
    /// into exposition labels.
    resource_labels: Labels,

    /// Metric names suppressed on the Prometheus path only.
    restrictions: Option<Vec<String>>,
}

impl ScrapeReader {
    /// Builds a reader for one instance. The attribute filter decides which
    /// resource attributes become labels on every exposed series; plugins
    /// widen the default filter to keep target-identifying labels.
    pub fn new(
        registry: Arc<MetricRegistry>,
        resource_attributes: &std::collections::BTreeMap<String, AttributeValue>,
        attribute_filter: ResourceAttributeFilter,
        restrictions: Option<Vec<String>>,
    ) -> Self {
        let resource_labels = resource_attributes
            .iter()
            .filter(|(key, _)| attribute_filter(key))
            .map(|(key, value)| (sanitize_label_name(key), value.to_string()))
            .collect();
        ScrapeReader {
            registry,
            resource_labels,
            restrictions,
        }
    }

    fn is_restricted(&self, metric_name: &str) -> bool {
        self.restrictions
            .as_ref()
            .is_some_and(|restricted| restricted.iter().any(|name| name == metric_name))
    }

    /// Collects one scrape's worth of snapshots from this instance.
    pub fn collect(&self) -> Vec<MetricSnapshot> {
        let mut snapshots = Vec::new();

        for metric in self.registry.metrics() {
            if self.is_restricted(metric.name()) {
                continue;
            }
            if !self.registry.filter().should_record(metric.name()) {
                continue;
            }

            let metadata = SnapshotMetadata {
                name: sanitize_metric_name(metric.name()),
                help: metric.description().to_string(),
                unit: metric.unit().to_string(),
            };

            let points = match metric.instrument_kind() {
                InstrumentKind::Histogram => {
                    let points: Vec<HistogramPoint> = metric
                        .histogram_cells()
                        .into_iter()
                        .map(|cell| HistogramPoint {
                            labels: self.labels_for(&cell.attributes),
                            boundaries: cell.boundaries,
                            bucket_counts: cell.bucket_counts,
                            sum: cell.sum,
                            count: cell.count,
                        })
                        .collect();
                    SnapshotPoints::Histogram(points)
                }
                kind => {
                    let points: Vec<NumberPoint> = metric
                        .read_observations()
                        .into_iter()
                        .map(|observation| NumberPoint {
                            labels: self.labels_for(&observation.attributes),
                            value: observation.value.as_f64(),
                            is_integer: metric.is_integer(),
                        })
                        .collect();
                    match kind {
                        InstrumentKind::Counter => SnapshotPoints::Counter(points),
                        // Up-down counters expose as gauges: they are not
                        // monotonic.
                        _ => SnapshotPoints::Gauge(points),
                    }
                }
            };

            if points.is_empty() {
                continue;
            }
            snapshots.push(MetricSnapshot { metadata, points });
        }

        snapshots
    }

    /// Resource labels first, series attributes layered on top.
    fn labels_for(&self, attributes: &crate::model::AttributeMap) -> Labels {
        let mut labels = self.resource_labels.clone();
        for (key, value) in attributes {
            labels.insert(sanitize_label_name(key), value.to_string());
        }
        labels
    }
}

/// The shared multi-instance reader behind the process-wide listener.
///
/// The reader list is append-only after instance startup; registration
/// happens while instances initialize, scrapes happen afterwards.
#[derive(Default)]
pub struct MergedScrapeReader {
    readers: RwLock<Vec<Arc<ScrapeReader>>>,
}

impl MergedScrapeReader {
    pub fn new() -> Self {
        MergedScrapeReader::default()
    }

    /// Registers one instance's scrape reader.
    pub fn register_reader(&self, reader: Arc<ScrapeReader>) {
        self.readers.write().push(reader);
    }

    pub fn reader_count(&self) -> usize {
        self.readers.read().len()
    }

    /// Collects and merges one scrape across every registered reader.
    ///
    /// Same-named snapshots merge by concatenating their data points while
    /// keeping the first snapshot's metadata; a merge failure keeps the
    /// first-seen snapshot and never aborts the scrape.
    pub fn collect(&self) -> Vec<MetricSnapshot> {
        let readers = self.readers.read();
        let mut by_name: std::collections::BTreeMap<String, MetricSnapshot> =
            std::collections::BTreeMap::new();

        for reader in readers.iter() {
            for snapshot in reader.collect() {
                let name = snapshot.metadata.name.clone();
                match by_name.entry(name) {
                    std::collections::btree_map::Entry::Vacant(entry) => {
                        entry.insert(snapshot);
                    }
                    std::collections::btree_map::Entry::Occupied(mut entry) => {
                        match merge_snapshots(entry.get(), &snapshot) {
                            Ok(merged) => {
                                entry.insert(merged);
                            }
                            Err(e) => {
                                error!("Merge metrics failed, keeping first snapshot: {}", e);
                            }
                        }
                    }
                }
            }
        }

        by_name.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricQueryResult;
    use crate::registry::MetricFilter;
    use crate::resource::default_prometheus_attribute_filter;
    use crate::store::RawMetric;
    use std::collections::BTreeMap;

    fn registry_with_status(value: i64) -> Arc<MetricRegistry> {
        let registry = Arc::new(MetricRegistry::new(
            vec![RawMetric::new(
                InstrumentKind::Gauge,
                "db.status",
                "The status of the database",
                "{status}",
                true,
            )],
            MetricFilter::allow_all(),
        ));
        registry.set_value("db.status", value);
        registry
    }

    fn resource(plugin: &str) -> BTreeMap<String, AttributeValue> {
        let mut attributes = BTreeMap::new();
        attributes.insert("plugin".to_string(), AttributeValue::from(plugin));
        attributes.insert("service.name".to_string(), AttributeValue::from("agent"));
        attributes
    }

    #[test]
    fn test_reader_applies_resource_filter() {
        let reader = ScrapeReader::new(
            registry_with_status(1),
            &resource("dameng-db"),
            default_prometheus_attribute_filter(),
            None,
        );
        let snapshots = reader.collect();
        assert_eq!(snapshots.len(), 1);

        let SnapshotPoints::Gauge(points) = &snapshots[0].points else {
            panic!("expected a gauge snapshot");
        };
        // The plugin label survives, service.name is filtered out.
        assert_eq!(points[0].labels.get("plugin").map(String::as_str), Some("dameng-db"));
        assert!(!points[0].labels.contains_key("service_name"));
    }

    #[test]
    fn test_reader_honors_prometheus_restrictions() {
        let reader = ScrapeReader::new(
            registry_with_status(1),
            &resource("dameng-db"),
            default_prometheus_attribute_filter(),
            Some(vec!["db.status".to_string()]),
        );
        assert!(reader.collect().is_empty());
    }

    #[test]
    fn test_merged_reader_concatenates_instances() {
        let merged = MergedScrapeReader::new();
        for (plugin, value) in [("orders-db", 1i64), ("billing-db", 0i64)] {
            merged.register_reader(Arc::new(ScrapeReader::new(
                registry_with_status(value),
                &resource(plugin),
                default_prometheus_attribute_filter(),
                None,
            )));
        }
        assert_eq!(merged.reader_count(), 2);

        let snapshots = merged.collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].points.len(), 2);
        assert_eq!(snapshots[0].metadata.help, "The status of the database");
    }

    #[test]
    fn test_multi_series_metric_is_exposed_per_key() {
        let registry = Arc::new(MetricRegistry::new(
            vec![RawMetric::new(
                InstrumentKind::Gauge,
                "queue.depth",
                "queue depth",
                "{message}",
                true,
            )],
            MetricFilter::allow_all(),
        ));
        registry.set_results(
            "queue.depth",
            &[
                MetricQueryResult::new(3i64)
                    .with_key("ORDERS")
                    .with_attribute("queue", "ORDERS"),
                MetricQueryResult::new(9i64)
                    .with_key("BILLING")
                    .with_attribute("queue", "BILLING"),
            ],
        );

        let reader = ScrapeReader::new(
            registry,
            &BTreeMap::new(),
            default_prometheus_attribute_filter(),
            None,
        );
        let snapshots = reader.collect();
        assert_eq!(snapshots[0].points.len(), 2);
    }
}
