// Scrape snapshot model - the shapes a scrape can carry and the merge rule
// applied when several collector instances report the same metric name
//
// Snapshots are plain data: each scrape produces a fresh set, so the types
// here carry no interior mutability and no references into the series
// stores.

use std::collections::BTreeMap;
use thiserror::Error;

/// Label set of one exposed data point; sorted for deterministic output.
pub type Labels = BTreeMap<String, String>;

/// Name, help text and unit of one exposed metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub name: String,
    pub help: String,
    pub unit: String,
}

/// A single-valued data point (gauges, counters, unknown-typed metrics).
#[derive(Debug, Clone, PartialEq)]
pub struct NumberPoint {
    pub labels: Labels,
    pub value: f64,
    /// True when the source metric is integer-typed end-to-end.
    pub is_integer: bool,
}

/// A histogram data point with explicit bucket boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramPoint {
    pub labels: Labels,
    /// Upper boundaries, ascending; `bucket_counts` has one extra overflow
    /// slot for the implicit +Inf bucket.
    pub boundaries: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

/// A summary data point carrying pre-computed quantiles.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryPoint {
    pub labels: Labels,
    /// (quantile, value) pairs.
    pub quantiles: Vec<(f64, f64)>,
    pub sum: f64,
    pub count: u64,
}

/// An info data point: constant value 1, information lives in the labels.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoPoint {
    pub labels: Labels,
}

/// A state-set data point: one boolean per named state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSetPoint {
    pub labels: Labels,
    pub states: Vec<(String, bool)>,
}

/// The seven data-point shapes a scrape snapshot can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotPoints {
    Gauge(Vec<NumberPoint>),
    Counter(Vec<NumberPoint>),
    Histogram(Vec<HistogramPoint>),
    Summary(Vec<SummaryPoint>),
    Info(Vec<InfoPoint>),
    StateSet(Vec<StateSetPoint>),
    Unknown(Vec<NumberPoint>),
}

impl SnapshotPoints {
    pub fn len(&self) -> usize {
        match self {
            SnapshotPoints::Gauge(points) => points.len(),
            SnapshotPoints::Counter(points) => points.len(),
            SnapshotPoints::Histogram(points) => points.len(),
            SnapshotPoints::Summary(points) => points.len(),
            SnapshotPoints::Info(points) => points.len(),
            SnapshotPoints::StateSet(points) => points.len(),
            SnapshotPoints::Unknown(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape_name(&self) -> &'static str {
        match self {
            SnapshotPoints::Gauge(_) => "gauge",
            SnapshotPoints::Counter(_) => "counter",
            SnapshotPoints::Histogram(_) => "histogram",
            SnapshotPoints::Summary(_) => "summary",
            SnapshotPoints::Info(_) => "info",
            SnapshotPoints::StateSet(_) => "stateset",
            SnapshotPoints::Unknown(_) => "unknown",
        }
    }
}

/// One metric as seen by one scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub metadata: SnapshotMetadata,
    pub points: SnapshotPoints,
}

/// Failure to merge two same-named snapshots.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("snapshot shapes differ for '{name}': {first} vs {second}")]
    ShapeMismatch {
        name: String,
        first: &'static str,
        second: &'static str,
    },
}

/// Merges two snapshots reported under the same metric name by different
/// collector instances: data-point lists are concatenated, the metadata
/// (help text, unit) of the first snapshot wins. One routine covers all
/// seven shapes; mismatched shapes cannot be merged.
pub fn merge_snapshots(
    first: &MetricSnapshot,
    second: &MetricSnapshot,
) -> Result<MetricSnapshot, MergeError> {
    use SnapshotPoints::*;

    fn concat<T: Clone>(a: &[T], b: &[T]) -> Vec<T> {
        let mut merged = Vec::with_capacity(a.len() + b.len());
        merged.extend_from_slice(a);
        merged.extend_from_slice(b);
        merged
    }

    let points = match (&first.points, &second.points) {
        (Gauge(a), Gauge(b)) => Gauge(concat(a, b)),
        (Counter(a), Counter(b)) => Counter(concat(a, b)),
        (Histogram(a), Histogram(b)) => Histogram(concat(a, b)),
        (Summary(a), Summary(b)) => Summary(concat(a, b)),
        (Info(a), Info(b)) => Info(concat(a, b)),
        (StateSet(a), StateSet(b)) => StateSet(concat(a, b)),
        (Unknown(a), Unknown(b)) => Unknown(concat(a, b)),
        (a, b) => {
            return Err(MergeError::ShapeMismatch {
                name: first.metadata.name.clone(),
                first: a.shape_name(),
                second: b.shape_name(),
            })
        }
    };

    Ok(MetricSnapshot {
        metadata: first.metadata.clone(),
        points,
    })
}

/// Rewrites a metric name into the exposition character set.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Rewrites a label name into the exposition character set.
pub fn sanitize_label_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge_snapshot(name: &str, help: &str, labels: &[(&str, &str)], value: f64) -> MetricSnapshot {
        let labels: Labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MetricSnapshot {
            metadata: SnapshotMetadata {
                name: name.to_string(),
                help: help.to_string(),
                unit: String::new(),
            },
            points: SnapshotPoints::Gauge(vec![NumberPoint {
                labels,
                value,
                is_integer: true,
            }]),
        }
    }

    #[test]
    fn test_merge_concatenates_disjoint_points() {
        let first = gauge_snapshot("db_status", "database status", &[("db_name", "orders")], 1.0);
        let second = gauge_snapshot("db_status", "other help", &[("db_name", "billing")], 0.0);

        let merged = merge_snapshots(&first, &second).unwrap();
        assert_eq!(merged.points.len(), 2);
        // Metadata of the first snapshot wins.
        assert_eq!(merged.metadata.help, "database status");
    }

    #[test]
    fn test_merge_rejects_mismatched_shapes() {
        let gauge = gauge_snapshot("m", "h", &[], 1.0);
        let counter = MetricSnapshot {
            metadata: gauge.metadata.clone(),
            points: SnapshotPoints::Counter(vec![]),
        };
        assert!(matches!(
            merge_snapshots(&gauge, &counter),
            Err(MergeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_merge_covers_histograms() {
        let point = HistogramPoint {
            labels: Labels::new(),
            boundaries: vec![1.0, 2.0],
            bucket_counts: vec![1, 0, 2],
            sum: 7.0,
            count: 3,
        };
        let metadata = SnapshotMetadata {
            name: "latency".to_string(),
            help: "h".to_string(),
            unit: "ms".to_string(),
        };
        let first = MetricSnapshot {
            metadata: metadata.clone(),
            points: SnapshotPoints::Histogram(vec![point.clone()]),
        };
        let second = MetricSnapshot {
            metadata,
            points: SnapshotPoints::Histogram(vec![point]),
        };
        let merged = merge_snapshots(&first, &second).unwrap();
        assert_eq!(merged.points.len(), 2);
    }

    #[test]
    fn test_sanitize_names() {
        assert_eq!(sanitize_metric_name("db.status"), "db_status");
        assert_eq!(sanitize_metric_name("system.cpu.load.1m"), "system_cpu_load_1m");
        assert_eq!(sanitize_metric_name("9lives"), "_9lives");
        assert_eq!(sanitize_label_name("host.name"), "host_name");
    }
}
