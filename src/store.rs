// Series store - holds the current and previous sample for every live series
// of one metric
//
// This module is responsible for:
// 1. Keeping one DataPoint per dimension-key combination of a metric
// 2. Computing direct or rate-derived output values from consecutive samples
// 3. Aging out series that stop being reported
// 4. Accumulating histogram recordings for the pull-export path
//
// Writers (the collection loop) and readers (push-export timer, scrape
// handler) run on different tasks; the keyed map therefore uses a
// concurrent map with atomic per-key replace semantics. No lock is held
// across a full read-then-emit pass.

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::Histogram;
use std::collections::BTreeMap;
use tracing::debug;

use crate::model::{AttributeMap, MetricQueryResult, MetricValue, DEFAULT_SERIES_KEY};

/// Time after which an unrefreshed series is considered outdated (ms).
pub const DEFAULT_OUTDATED_TIME_MS: u64 = 125_000;

/// Default rate unit: deltas over millisecond timestamps become per-second rates.
pub const DEFAULT_RATE_UNIT: f64 = 1000.0;

/// Bucket boundaries applied to histograms that do not declare their own.
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// The instrument shape a metric is registered as, resolved once at
/// registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    /// Point-in-time measurement that can go up and down
    Gauge,

    /// Monotonically increasing cumulative measurement
    Counter,

    /// Cumulative measurement that allows both increases and decreases
    UpDownCounter,

    /// Distribution of recorded values
    Histogram,
}

/// How a metric's output value is derived from its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculationMode {
    /// Report the latest sampled value verbatim
    Direct,

    /// Report a per-time-unit delta derived from two consecutive samples
    Rate,
}

/// Current epoch time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// One series of a metric: the current and previous sample plus the
/// dimension labels attached to this series.
///
/// The previous value/time pair always reflects the sample immediately
/// prior to the current one; a fresh series holds neither.
#[derive(Debug, Clone, Default)]
pub struct DataPoint {
    current_value: Option<MetricValue>,
    previous_value: Option<MetricValue>,
    current_time_ms: u64,
    previous_time_ms: u64,
    attributes: AttributeMap,
}

impl DataPoint {
    fn new() -> Self {
        DataPoint::default()
    }

    /// Records a sample at an explicit timestamp, shifting the current
    /// sample into the previous slot.
    ///
    /// A `None` value is a no-op: a collector can signal "no data this
    /// cycle" without corrupting the current/previous history. When an
    /// attribute map is supplied it replaces the stored one.
    pub fn set_value_at(
        &mut self,
        value: Option<MetricValue>,
        attributes: Option<&AttributeMap>,
        now_ms: u64,
    ) {
        let Some(value) = value else {
            return;
        };
        self.previous_value = self.current_value;
        self.previous_time_ms = self.current_time_ms;
        self.current_value = Some(value);
        self.current_time_ms = now_ms;
        if let Some(attributes) = attributes {
            self.attributes = attributes.clone();
        }
    }

    /// Computes the output value of this series.
    ///
    /// Direct mode returns the current value unchanged. Rate mode requires
    /// two samples with strictly increasing timestamps and returns
    /// `rate_unit * delta / time_delta`; the delta is taken in integer or
    /// floating arithmetic per `is_integer`, the result is carried as a
    /// double and converted on emission.
    pub fn value(
        &self,
        mode: CalculationMode,
        is_integer: bool,
        rate_unit: f64,
    ) -> Option<MetricValue> {
        match mode {
            CalculationMode::Direct => self.current_value,
            CalculationMode::Rate => {
                let current = self.current_value?;
                let previous = self.previous_value?;
                if self.current_time_ms <= self.previous_time_ms {
                    return None;
                }
                let delta = if is_integer {
                    (current.as_i64() - previous.as_i64()) as f64
                } else {
                    current.as_f64() - previous.as_f64()
                };
                let time_delta = (self.current_time_ms - self.previous_time_ms) as f64;
                Some(MetricValue::Double(rate_unit * delta / time_delta))
            }
        }
    }

    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    pub fn current_time_ms(&self) -> u64 {
        self.current_time_ms
    }

    pub fn current_value(&self) -> Option<MetricValue> {
        self.current_value
    }

    pub fn previous_value(&self) -> Option<MetricValue> {
        self.previous_value
    }
}

/// One emitted (value, attributes) pair produced by a read pass.
#[derive(Debug, Clone)]
pub struct Observation {
    pub value: MetricValue,
    pub attributes: AttributeMap,
}

/// Accumulated state of one histogram attribute combination.
#[derive(Debug, Clone)]
pub struct HistogramCell {
    pub attributes: AttributeMap,
    /// Upper bucket boundaries, ascending; counts has one extra overflow slot.
    pub boundaries: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

/// The OTLP histogram instrument a histogram-kind metric writes through to.
pub enum BoundHistogram {
    Long(Histogram<u64>),
    Double(Histogram<f64>),
}

/// The series store for one metric: its definition plus the keyed set of
/// current/previous samples.
///
/// Created once at collector-instance initialization from the plugin's
/// static metric catalog; mutated by `set_value` calls during each
/// collection cycle and drained by read passes during export; never
/// destroyed except with the owning instance.
///
/// Histogram-kind metrics never populate the data-point map: every
/// recording goes straight to the bound instrument (push path) and to the
/// per-attribute accumulator (pull path).
pub struct RawMetric {
    name: String,
    instrument_kind: InstrumentKind,
    description: String,
    unit: String,
    is_integer: bool,
    calculation_mode: CalculationMode,
    rate_unit: f64,
    outdated_time_ms: u64,
    clear_after_read: bool,
    bucket_boundaries: Option<Vec<f64>>,
    data_points: DashMap<String, DataPoint>,
    histogram: OnceCell<BoundHistogram>,
    histogram_cells: DashMap<String, HistogramCell>,
}

impl RawMetric {
    /// Creates a new metric definition with default calculation settings.
    pub fn new(
        instrument_kind: InstrumentKind,
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        is_integer: bool,
    ) -> Self {
        RawMetric {
            name: name.into(),
            instrument_kind,
            description: description.into(),
            unit: unit.into(),
            is_integer,
            calculation_mode: CalculationMode::Direct,
            rate_unit: DEFAULT_RATE_UNIT,
            outdated_time_ms: DEFAULT_OUTDATED_TIME_MS,
            clear_after_read: false,
            bucket_boundaries: None,
            data_points: DashMap::new(),
            histogram: OnceCell::new(),
            histogram_cells: DashMap::new(),
        }
    }

    pub fn with_calculation_mode(mut self, mode: CalculationMode) -> Self {
        self.calculation_mode = mode;
        self
    }

    pub fn with_rate_unit(mut self, rate_unit: f64) -> Self {
        self.rate_unit = rate_unit;
        self
    }

    pub fn with_outdated_time_ms(mut self, outdated_time_ms: u64) -> Self {
        self.outdated_time_ms = outdated_time_ms;
        self
    }

    /// Emitted entries are removed after each read pass. Used for
    /// write-once counters that should not repeat between pushes.
    pub fn with_clear_after_read(mut self, clear_after_read: bool) -> Self {
        self.clear_after_read = clear_after_read;
        self
    }

    pub fn with_bucket_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.bucket_boundaries = Some(boundaries);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instrument_kind(&self) -> InstrumentKind {
        self.instrument_kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn is_integer(&self) -> bool {
        self.is_integer
    }

    pub fn calculation_mode(&self) -> CalculationMode {
        self.calculation_mode
    }

    pub fn rate_unit(&self) -> f64 {
        self.rate_unit
    }

    pub fn outdated_time_ms(&self) -> u64 {
        self.outdated_time_ms
    }

    pub fn clear_after_read(&self) -> bool {
        self.clear_after_read
    }

    pub fn bucket_boundaries(&self) -> Option<&[f64]> {
        self.bucket_boundaries.as_deref()
    }

    /// Records a value against the default series key.
    pub fn set_value(&self, value: impl Into<MetricValue>) {
        self.apply_at(Some(value.into()), None, None, now_millis());
    }

    /// Records a value with dimension attributes against the default key.
    pub fn set_value_with_attributes(&self, value: impl Into<MetricValue>, attributes: AttributeMap) {
        self.apply_at(Some(value.into()), None, Some(&attributes), now_millis());
    }

    /// Records one query result; the result's key selects the series.
    pub fn set_result(&self, result: &MetricQueryResult) {
        self.apply_at(result.value(), result.key(), Some(result.attributes()), now_millis());
    }

    /// Records a batch of query results, one series per distinct key. This
    /// is how one metric carries an arbitrary number of concurrently-live
    /// dimension combinations.
    pub fn set_results(&self, results: &[MetricQueryResult]) {
        let now = now_millis();
        for result in results {
            self.apply_at(result.value(), result.key(), Some(result.attributes()), now);
        }
    }

    /// Records a sample at an explicit timestamp. Routes histogram-kind
    /// metrics to the accumulator; otherwise resolves (or creates) the
    /// series for the key and shifts current into previous.
    pub fn apply_at(
        &self,
        value: Option<MetricValue>,
        key: Option<&str>,
        attributes: Option<&AttributeMap>,
        now_ms: u64,
    ) {
        if self.instrument_kind == InstrumentKind::Histogram {
            if let Some(value) = value {
                self.record_histogram(value, attributes);
            }
            return;
        }

        let Some(value) = value else {
            return;
        };
        let key = key.unwrap_or(DEFAULT_SERIES_KEY);
        let mut point = self
            .data_points
            .entry(key.to_string())
            .or_insert_with(DataPoint::new);
        point.set_value_at(Some(value), attributes, now_ms);
        debug!(metric = %self.name, key = %key, "new metric value: {:?}", value);
    }

    /// Binds the OTLP histogram instrument this metric writes through to.
    /// Later bind attempts are ignored; instruments are bound exactly once
    /// at registration.
    pub fn bind_histogram(&self, bound: BoundHistogram) {
        let _ = self.histogram.set(bound);
    }

    fn record_histogram(&self, value: MetricValue, attributes: Option<&AttributeMap>) {
        let empty = AttributeMap::new();
        let attributes = attributes.unwrap_or(&empty);

        // Pull path: accumulate into the per-attribute cell.
        let cell_key = attribute_cell_key(attributes);
        let boundaries = self
            .bucket_boundaries
            .clone()
            .unwrap_or_else(|| DEFAULT_HISTOGRAM_BOUNDARIES.to_vec());
        let mut cell = self
            .histogram_cells
            .entry(cell_key)
            .or_insert_with(|| HistogramCell {
                attributes: attributes.clone(),
                bucket_counts: vec![0; boundaries.len() + 1],
                boundaries,
                sum: 0.0,
                count: 0,
            });
        let sample = value.as_f64();
        let bucket = cell.boundaries.partition_point(|bound| *bound < sample);
        cell.bucket_counts[bucket] += 1;
        cell.sum += sample;
        cell.count += 1;
        drop(cell);

        // Push path: write through to the bound instrument.
        if let Some(bound) = self.histogram.get() {
            let key_values = crate::model::attributes_to_key_values(attributes);
            match bound {
                BoundHistogram::Long(histogram) => histogram.record(value.as_u64(), &key_values),
                BoundHistogram::Double(histogram) => histogram.record(value.as_f64(), &key_values),
            }
        }
    }

    /// Removes every series whose latest sample is older than the
    /// staleness window. Invoked at the head of every export read so that
    /// dimensions that stopped reporting (a queue that no longer exists, a
    /// detached disk) silently drop out.
    pub fn purge_outdated(&self) {
        self.purge_outdated_at(now_millis());
    }

    /// Purge against an explicit "now"; removal is independent of read
    /// activity.
    pub fn purge_outdated_at(&self, now_ms: u64) {
        self.data_points
            .retain(|_, point| now_ms.saturating_sub(point.current_time_ms) <= self.outdated_time_ms);
    }

    /// The read-callback body: purge, then emit a (value, attributes) pair
    /// for every series with a computable value, then remove exactly the
    /// emitted entries when clear-after-read is set.
    pub fn read_observations(&self) -> Vec<Observation> {
        self.read_observations_at(now_millis())
    }

    /// Read pass against an explicit "now".
    pub fn read_observations_at(&self, now_ms: u64) -> Vec<Observation> {
        self.purge_outdated_at(now_ms);

        let mut observations = Vec::new();
        let mut emitted_keys = Vec::new();
        for entry in self.data_points.iter() {
            let Some(value) = entry
                .value()
                .value(self.calculation_mode, self.is_integer, self.rate_unit)
            else {
                continue;
            };
            observations.push(Observation {
                value,
                attributes: entry.value().attributes().clone(),
            });
            if self.clear_after_read {
                emitted_keys.push(entry.key().clone());
            }
        }
        for key in emitted_keys {
            self.data_points.remove(&key);
        }
        observations
    }

    /// Returns the computed value of one series, mainly for tests and
    /// plugin sanity checks.
    pub fn value_of(&self, key: Option<&str>) -> Option<MetricValue> {
        let key = key.unwrap_or(DEFAULT_SERIES_KEY);
        self.data_points
            .get(key)
            .and_then(|point| {
                point
                    .value()
                    .value(self.calculation_mode, self.is_integer, self.rate_unit)
            })
    }

    pub fn data_point_count(&self) -> usize {
        self.data_points.len()
    }

    pub fn has_data_point(&self, key: &str) -> bool {
        self.data_points.contains_key(key)
    }

    /// Snapshot of the histogram accumulator, one cell per attribute
    /// combination.
    pub fn histogram_cells(&self) -> Vec<HistogramCell> {
        self.histogram_cells
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Canonical map key for a histogram attribute combination.
fn attribute_cell_key(attributes: &AttributeMap) -> String {
    let sorted: BTreeMap<&String, String> = attributes
        .iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect();
    let mut out = String::new();
    for (key, value) in sorted {
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\u{1f}');
    }
    out
}
