// Text exposition - renders scrape snapshots into the Prometheus text
// format (version 0.0.4)

use std::fmt::Write;

use super::snapshot::{
    HistogramPoint, Labels, MetricSnapshot, NumberPoint, SnapshotPoints, StateSetPoint,
    SummaryPoint,
};

/// Content type of the rendered document.
pub const TEXT_FORMAT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders a full exposition document. Metrics are rendered in snapshot
/// order (the merged reader yields them sorted by name), data points in
/// label order for stable output.
pub fn render(snapshots: &[MetricSnapshot]) -> String {
    let mut out = String::new();
    for snapshot in snapshots {
        render_snapshot(&mut out, snapshot);
    }
    out
}

fn render_snapshot(out: &mut String, snapshot: &MetricSnapshot) {
    let name = &snapshot.metadata.name;
    if !snapshot.metadata.help.is_empty() {
        let _ = writeln!(out, "# HELP {} {}", name, escape_help(&snapshot.metadata.help));
    }
    let _ = writeln!(out, "# TYPE {} {}", name, type_token(&snapshot.points));

    match &snapshot.points {
        SnapshotPoints::Gauge(points)
        | SnapshotPoints::Counter(points)
        | SnapshotPoints::Unknown(points) => {
            for point in sorted(points, |p| &p.labels) {
                let _ = writeln!(
                    out,
                    "{}{} {}",
                    name,
                    render_labels(&point.labels),
                    format_number(point.value, point.is_integer)
                );
            }
        }
        SnapshotPoints::Histogram(points) => {
            for point in sorted(points, |p| &p.labels) {
                render_histogram(out, name, point);
            }
        }
        SnapshotPoints::Summary(points) => {
            for point in sorted(points, |p| &p.labels) {
                for (quantile, value) in &point.quantiles {
                    let mut labels = point.labels.clone();
                    labels.insert("quantile".to_string(), format_f64(*quantile));
                    let _ = writeln!(out, "{}{} {}", name, render_labels(&labels), format_f64(*value));
                }
                let _ = writeln!(out, "{}_sum{} {}", name, render_labels(&point.labels), format_f64(point.sum));
                let _ = writeln!(out, "{}_count{} {}", name, render_labels(&point.labels), point.count);
            }
        }
        SnapshotPoints::Info(points) => {
            for point in points {
                let _ = writeln!(out, "{}{} 1", name, render_labels(&point.labels));
            }
        }
        SnapshotPoints::StateSet(points) => {
            for point in sorted(points, |p| &p.labels) {
                for (state, active) in &point.states {
                    let mut labels = point.labels.clone();
                    labels.insert(name.clone(), state.clone());
                    let _ = writeln!(
                        out,
                        "{}{} {}",
                        name,
                        render_labels(&labels),
                        if *active { 1 } else { 0 }
                    );
                }
            }
        }
    }
}

fn render_histogram(out: &mut String, name: &str, point: &HistogramPoint) {
    // Bucket counts are stored per bucket; the exposition wants them
    // cumulative.
    let mut cumulative: u64 = 0;
    for (index, boundary) in point.boundaries.iter().enumerate() {
        cumulative += point.bucket_counts.get(index).copied().unwrap_or(0);
        let mut labels = point.labels.clone();
        labels.insert("le".to_string(), format_f64(*boundary));
        let _ = writeln!(out, "{}_bucket{} {}", name, render_labels(&labels), cumulative);
    }
    let mut labels = point.labels.clone();
    labels.insert("le".to_string(), "+Inf".to_string());
    let _ = writeln!(out, "{}_bucket{} {}", name, render_labels(&labels), point.count);
    let _ = writeln!(out, "{}_sum{} {}", name, render_labels(&point.labels), format_f64(point.sum));
    let _ = writeln!(out, "{}_count{} {}", name, render_labels(&point.labels), point.count);
}

fn type_token(points: &SnapshotPoints) -> &'static str {
    match points {
        SnapshotPoints::Gauge(_) => "gauge",
        SnapshotPoints::Counter(_) => "counter",
        SnapshotPoints::Histogram(_) => "histogram",
        SnapshotPoints::Summary(_) => "summary",
        // Info and state sets have no classic text-format type; they expose
        // as gauges with constant values.
        SnapshotPoints::Info(_) => "gauge",
        SnapshotPoints::StateSet(_) => "gauge",
        SnapshotPoints::Unknown(_) => "untyped",
    }
}

fn sorted<'a, T, F>(points: &'a [T], key: F) -> Vec<&'a T>
where
    F: Fn(&'a T) -> &'a Labels,
{
    let mut ordered: Vec<&T> = points.iter().collect();
    ordered.sort_by(|a, b| key(a).cmp(key(b)));
    ordered
}

fn render_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    let mut first = true;
    for (key, value) in labels {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{}=\"{}\"", key, escape_label_value(value));
    }
    out.push('}');
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_number(value: f64, is_integer: bool) -> String {
    if is_integer {
        format!("{}", value as i64)
    } else {
        format_f64(value)
    }
}

fn format_f64(value: f64) -> String {
    if value.is_infinite() {
        if value > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() }
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prometheus::snapshot::SnapshotMetadata;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_gauge_with_labels() {
        let snapshot = MetricSnapshot {
            metadata: SnapshotMetadata {
                name: "db_status".to_string(),
                help: "The status of the database".to_string(),
                unit: "{status}".to_string(),
            },
            points: SnapshotPoints::Gauge(vec![NumberPoint {
                labels: labels(&[("plugin", "dameng-db")]),
                value: 1.0,
                is_integer: true,
            }]),
        };

        let text = render(&[snapshot]);
        assert!(text.contains("# HELP db_status The status of the database\n"));
        assert!(text.contains("# TYPE db_status gauge\n"));
        assert!(text.contains("db_status{plugin=\"dameng-db\"} 1\n"));
    }

    #[test]
    fn test_render_escapes_label_values() {
        let snapshot = MetricSnapshot {
            metadata: SnapshotMetadata {
                name: "fs_usage".to_string(),
                help: String::new(),
                unit: "By".to_string(),
            },
            points: SnapshotPoints::Gauge(vec![NumberPoint {
                labels: labels(&[("path", "C:\\data\"x\"")]),
                value: 2.5,
                is_integer: false,
            }]),
        };
        let text = render(&[snapshot]);
        assert!(text.contains("fs_usage{path=\"C:\\\\data\\\"x\\\"\"} 2.5\n"));
    }

    #[test]
    fn test_render_histogram_is_cumulative() {
        let snapshot = MetricSnapshot {
            metadata: SnapshotMetadata {
                name: "req_latency".to_string(),
                help: "latency".to_string(),
                unit: "ms".to_string(),
            },
            points: SnapshotPoints::Histogram(vec![HistogramPoint {
                labels: Labels::new(),
                boundaries: vec![10.0, 100.0],
                bucket_counts: vec![2, 1, 1],
                sum: 142.0,
                count: 4,
            }]),
        };

        let text = render(&[snapshot]);
        assert!(text.contains("req_latency_bucket{le=\"10\"} 2\n"));
        assert!(text.contains("req_latency_bucket{le=\"100\"} 3\n"));
        assert!(text.contains("req_latency_bucket{le=\"+Inf\"} 4\n"));
        assert!(text.contains("req_latency_sum 142\n"));
        assert!(text.contains("req_latency_count 4\n"));
    }

    #[test]
    fn test_render_points_sorted_by_labels() {
        let snapshot = MetricSnapshot {
            metadata: SnapshotMetadata {
                name: "queue_depth".to_string(),
                help: String::new(),
                unit: String::new(),
            },
            points: SnapshotPoints::Gauge(vec![
                NumberPoint {
                    labels: labels(&[("queue", "zeta")]),
                    value: 1.0,
                    is_integer: true,
                },
                NumberPoint {
                    labels: labels(&[("queue", "alpha")]),
                    value: 2.0,
                    is_integer: true,
                },
            ]),
        };
        let text = render(&[snapshot]);
        let alpha = text.find("alpha").unwrap();
        let zeta = text.find("zeta").unwrap();
        assert!(alpha < zeta);
    }
}
