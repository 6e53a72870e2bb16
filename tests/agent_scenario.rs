// End-to-end scenarios: a database-style collector whose source goes down,
// the stale-series age-out, and a full agent run with a live scrape
// endpoint.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use telemetry_collector::agent::Agent;
use telemetry_collector::collectors::CollectorPlugin;
use telemetry_collector::config::AgentConfig;
use telemetry_collector::model::MetricValue;
use telemetry_collector::prometheus::reader::ScrapeReader;
use telemetry_collector::prometheus::snapshot::SnapshotPoints;
use telemetry_collector::registry::{MetricFilter, MetricRegistry};
use telemetry_collector::resource::default_prometheus_attribute_filter;
use telemetry_collector::scheduler::run_cycle;
use telemetry_collector::store::{InstrumentKind, RawMetric};

const STATUS_METRIC: &str = "db.status";
const OUTDATED_MS: u64 = 200;

/// A database-style plugin backed by a switchable "source reachable" flag.
struct MockDbPlugin {
    reachable: Arc<AtomicBool>,
}

#[async_trait]
impl CollectorPlugin for MockDbPlugin {
    fn kind(&self) -> &'static str {
        "mock-db"
    }

    fn initial_metric_catalog(&self) -> Vec<RawMetric> {
        vec![
            RawMetric::new(
                InstrumentKind::Gauge,
                STATUS_METRIC,
                "The status of the database",
                "{status}",
                true,
            )
            .with_outdated_time_ms(OUTDATED_MS),
            RawMetric::new(
                InstrumentKind::Gauge,
                "db.session.count",
                "Number of sessions",
                "{session}",
                true,
            )
            .with_outdated_time_ms(OUTDATED_MS),
        ]
    }

    fn availability_metric(&self) -> Option<&str> {
        Some(STATUS_METRIC)
    }

    async fn collect_data(
        &self,
        registry: &MetricRegistry,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err("connection refused".into());
        }
        registry.set_value("db.session.count", 17i64);
        Ok(())
    }
}

fn scrape_value(reader: &ScrapeReader, metric: &str) -> Option<f64> {
    reader
        .collect()
        .into_iter()
        .find(|snapshot| snapshot.metadata.name == metric)
        .and_then(|snapshot| match snapshot.points {
            SnapshotPoints::Gauge(points) => points.first().map(|point| point.value),
            _ => None,
        })
}

#[tokio::test]
async fn status_gauge_follows_source_reachability_and_ages_out() {
    let reachable = Arc::new(AtomicBool::new(true));
    let plugin = MockDbPlugin {
        reachable: Arc::clone(&reachable),
    };
    let registry = Arc::new(MetricRegistry::new(
        plugin.initial_metric_catalog(),
        MetricFilter::allow_all(),
    ));
    let reader = ScrapeReader::new(
        Arc::clone(&registry),
        &BTreeMap::new(),
        default_prometheus_attribute_filter(),
        None,
    );

    // Cycle 1: the source responds.
    run_cycle(&plugin, &registry).await;
    assert_eq!(scrape_value(&reader, "db_status"), Some(1.0));
    assert_eq!(scrape_value(&reader, "db_session_count"), Some(17.0));

    // Cycle 2: the source is unreachable; the scrape right after must
    // report status 0.
    reachable.store(false, Ordering::SeqCst);
    run_cycle(&plugin, &registry).await;
    assert_eq!(scrape_value(&reader, "db_status"), Some(0.0));

    let status = registry.raw_metric(STATUS_METRIC).unwrap();
    assert_eq!(status.value_of(None), Some(MetricValue::Long(0)));

    // No further cycles: once the staleness window passes, the series is
    // absent from the scrape.
    tokio::time::sleep(Duration::from_millis(OUTDATED_MS + 100)).await;
    assert_eq!(scrape_value(&reader, "db_status"), None);
    assert_eq!(scrape_value(&reader, "db_session_count"), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn agent_serves_host_metrics_on_the_shared_scrape_endpoint() {
    let config: AgentConfig = serde_yaml::from_str(
        r#"
plugin: host
instances:
  - otel.poll.interval: 1
    otel.transport: "prometheus"
    prometheus.host: "127.0.0.1"
    prometheus.port: 0
"#,
    )
    .unwrap();

    let mut agent = Agent::new(config);
    agent.start().await.unwrap();
    let address = agent.scrape_address().expect("scrape endpoint must be up");

    // Let the first collection cycle land.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let body = http_get(&address.to_string(), "/metrics").await;
    assert!(body.contains("# TYPE host_status gauge"), "body:\n{}", body);
    assert!(body.contains("host_status{"), "body:\n{}", body);
    assert!(body.contains("plugin=\"host\""), "body:\n{}", body);
    assert!(body.contains("system_memory_usage{"), "body:\n{}", body);

    agent.shutdown().await;
}

/// Minimal HTTP GET over a raw socket; keeps the test free of client
/// dependencies.
async fn http_get(address: &str, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, address
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).to_string()
}
