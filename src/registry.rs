// Metric registry - the per-instance catalog of series stores and their
// binding to the export runtime
//
// Each collector instance owns a name-to-metric catalog, pre-populated from
// the plugin's initial metric catalog before any configuration is read.
// Registration resolves every metric once into one of four instrument
// shapes; the export layer then drives the pull-style read callbacks on its
// own timer without any per-call type dispatch.

use dashmap::DashMap;
use opentelemetry::metrics::Meter;
use std::sync::Arc;
use tracing::debug;

use crate::model::{attributes_to_key_values, AttributeMap, MetricQueryResult, MetricValue};
use crate::store::{BoundHistogram, InstrumentKind, RawMetric};

/// Operator-supplied metric suppression list.
///
/// Metrics named in the restriction list are dropped before recording and
/// before emission, letting operators silence expensive or noisy metrics
/// without touching collector code.
#[derive(Debug, Default)]
pub struct MetricFilter {
    restricted: Option<Vec<String>>,
}

impl MetricFilter {
    pub fn new(restricted: Option<Vec<String>>) -> Self {
        MetricFilter { restricted }
    }

    /// A filter that records everything.
    pub fn allow_all() -> Self {
        MetricFilter { restricted: None }
    }

    /// Returns false for metrics the operator has restricted.
    pub fn should_record(&self, metric_name: &str) -> bool {
        match &self.restricted {
            None => true,
            Some(restricted) => !restricted.iter().any(|name| name == metric_name),
        }
    }
}

/// Per-instance map of metric name to series store.
pub struct MetricRegistry {
    metrics: DashMap<String, Arc<RawMetric>>,
    filter: Arc<MetricFilter>,
}

impl MetricRegistry {
    /// Builds a registry from a plugin's initial metric catalog.
    pub fn new(catalog: Vec<RawMetric>, filter: MetricFilter) -> Self {
        let metrics = DashMap::new();
        for metric in catalog {
            metrics.insert(metric.name().to_string(), Arc::new(metric));
        }
        MetricRegistry {
            metrics,
            filter: Arc::new(filter),
        }
    }

    /// Retrieves a series store by metric name.
    pub fn raw_metric(&self, name: &str) -> Option<Arc<RawMetric>> {
        self.metrics.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// All registered series stores, in no particular order.
    pub fn metrics(&self) -> Vec<Arc<RawMetric>> {
        self.metrics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn filter(&self) -> &Arc<MetricFilter> {
        &self.filter
    }

    /// Records a value against the named metric's default series. Unknown
    /// names and restricted metrics are ignored.
    pub fn set_value(&self, name: &str, value: impl Into<MetricValue>) {
        if !self.filter.should_record(name) {
            return;
        }
        match self.raw_metric(name) {
            Some(metric) => metric.set_value(value),
            None => debug!(metric = %name, "set_value for a metric not in the catalog"),
        }
    }

    /// Records a value with attributes against the named metric.
    pub fn set_value_with_attributes(
        &self,
        name: &str,
        value: impl Into<MetricValue>,
        attributes: AttributeMap,
    ) {
        if !self.filter.should_record(name) {
            return;
        }
        match self.raw_metric(name) {
            Some(metric) => metric.set_value_with_attributes(value, attributes),
            None => debug!(metric = %name, "set_value for a metric not in the catalog"),
        }
    }

    /// Records one query result against the named metric.
    pub fn set_result(&self, name: &str, result: &MetricQueryResult) {
        if !self.filter.should_record(name) {
            return;
        }
        match self.raw_metric(name) {
            Some(metric) => metric.set_result(result),
            None => debug!(metric = %name, "set_result for a metric not in the catalog"),
        }
    }

    /// Records a batch of query results against the named metric.
    pub fn set_results(&self, name: &str, results: &[MetricQueryResult]) {
        if !self.filter.should_record(name) {
            return;
        }
        match self.raw_metric(name) {
            Some(metric) => metric.set_results(results),
            None => debug!(metric = %name, "set_results for a metric not in the catalog"),
        }
    }

    /// Binds every metric in the catalog to the given meter.
    ///
    /// Gauges, counters and up-down counters become observable instruments
    /// whose callbacks run the purge-then-emit read pass; histograms become
    /// write-through instruments recorded at `set_value` time. The shape
    /// and numeric kind are resolved here, exactly once.
    pub fn bind_instruments(&self, meter: &Meter) {
        for entry in self.metrics.iter() {
            register_metric(meter, Arc::clone(entry.value()), Arc::clone(&self.filter));
        }
    }
}

/// Registers one metric with the meter.
fn register_metric(meter: &Meter, metric: Arc<RawMetric>, filter: Arc<MetricFilter>) {
    let name = metric.name().to_string();
    let description = metric.description().to_string();
    let unit = metric.unit().to_string();

    match (metric.instrument_kind(), metric.is_integer()) {
        (InstrumentKind::Gauge, true) => {
            meter
                .i64_observable_gauge(name)
                .with_description(description)
                .with_unit(unit)
                .with_callback(move |observer| {
                    if !filter.should_record(metric.name()) {
                        return;
                    }
                    for observation in metric.read_observations() {
                        observer.observe(
                            observation.value.as_i64(),
                            &attributes_to_key_values(&observation.attributes),
                        );
                    }
                })
                .build();
        }
        (InstrumentKind::Gauge, false) => {
            meter
                .f64_observable_gauge(name)
                .with_description(description)
                .with_unit(unit)
                .with_callback(move |observer| {
                    if !filter.should_record(metric.name()) {
                        return;
                    }
                    for observation in metric.read_observations() {
                        observer.observe(
                            observation.value.as_f64(),
                            &attributes_to_key_values(&observation.attributes),
                        );
                    }
                })
                .build();
        }
        (InstrumentKind::Counter, true) => {
            meter
                .u64_observable_counter(name)
                .with_description(description)
                .with_unit(unit)
                .with_callback(move |observer| {
                    if !filter.should_record(metric.name()) {
                        return;
                    }
                    for observation in metric.read_observations() {
                        observer.observe(
                            observation.value.as_u64(),
                            &attributes_to_key_values(&observation.attributes),
                        );
                    }
                })
                .build();
        }
        (InstrumentKind::Counter, false) => {
            meter
                .f64_observable_counter(name)
                .with_description(description)
                .with_unit(unit)
                .with_callback(move |observer| {
                    if !filter.should_record(metric.name()) {
                        return;
                    }
                    for observation in metric.read_observations() {
                        observer.observe(
                            observation.value.as_f64(),
                            &attributes_to_key_values(&observation.attributes),
                        );
                    }
                })
                .build();
        }
        (InstrumentKind::UpDownCounter, true) => {
            meter
                .i64_observable_up_down_counter(name)
                .with_description(description)
                .with_unit(unit)
                .with_callback(move |observer| {
                    if !filter.should_record(metric.name()) {
                        return;
                    }
                    for observation in metric.read_observations() {
                        observer.observe(
                            observation.value.as_i64(),
                            &attributes_to_key_values(&observation.attributes),
                        );
                    }
                })
                .build();
        }
        (InstrumentKind::UpDownCounter, false) => {
            meter
                .f64_observable_up_down_counter(name)
                .with_description(description)
                .with_unit(unit)
                .with_callback(move |observer| {
                    if !filter.should_record(metric.name()) {
                        return;
                    }
                    for observation in metric.read_observations() {
                        observer.observe(
                            observation.value.as_f64(),
                            &attributes_to_key_values(&observation.attributes),
                        );
                    }
                })
                .build();
        }
        (InstrumentKind::Histogram, true) => {
            let mut builder = meter
                .u64_histogram(name)
                .with_description(description)
                .with_unit(unit);
            if let Some(boundaries) = metric.bucket_boundaries() {
                builder = builder.with_boundaries(boundaries.to_vec());
            }
            metric.bind_histogram(BoundHistogram::Long(builder.build()));
        }
        (InstrumentKind::Histogram, false) => {
            let mut builder = meter
                .f64_histogram(name)
                .with_description(description)
                .with_unit(unit);
            if let Some(boundaries) = metric.bucket_boundaries() {
                builder = builder.with_boundaries(boundaries.to_vec());
            }
            metric.bind_histogram(BoundHistogram::Double(builder.build()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CalculationMode;

    fn test_catalog() -> Vec<RawMetric> {
        vec![
            RawMetric::new(InstrumentKind::Gauge, "db.status", "database status", "{status}", true),
            RawMetric::new(InstrumentKind::Gauge, "db.sql.rate", "sql per second", "{sql}", true)
                .with_calculation_mode(CalculationMode::Rate),
        ]
    }

    #[test]
    fn test_filter_restricts_named_metrics() {
        let filter = MetricFilter::new(Some(vec!["db.sql.rate".to_string()]));
        assert!(filter.should_record("db.status"));
        assert!(!filter.should_record("db.sql.rate"));
        assert!(MetricFilter::allow_all().should_record("db.sql.rate"));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = MetricRegistry::new(test_catalog(), MetricFilter::allow_all());
        assert_eq!(registry.len(), 2);
        assert!(registry.raw_metric("db.status").is_some());
        assert!(registry.raw_metric("missing").is_none());
    }

    #[test]
    fn test_set_value_honors_restrictions() {
        let filter = MetricFilter::new(Some(vec!["db.status".to_string()]));
        let registry = MetricRegistry::new(test_catalog(), filter);

        registry.set_value("db.status", 1i64);
        let metric = registry.raw_metric("db.status").unwrap();
        assert_eq!(metric.data_point_count(), 0);
    }

    #[test]
    fn test_set_value_for_unknown_metric_is_ignored() {
        let registry = MetricRegistry::new(test_catalog(), MetricFilter::allow_all());
        // Must not panic or create anything.
        registry.set_value("not.in.catalog", 1i64);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_set_results_fans_out_per_key() {
        let registry = MetricRegistry::new(test_catalog(), MetricFilter::allow_all());
        registry.set_results(
            "db.status",
            &[
                MetricQueryResult::new(1i64).with_key("primary"),
                MetricQueryResult::new(0i64).with_key("replica"),
            ],
        );
        let metric = registry.raw_metric("db.status").unwrap();
        assert_eq!(metric.data_point_count(), 2);
    }
}
