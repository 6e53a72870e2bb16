// Export adapters - builders for the batched OTLP push pipeline
//
// This module is responsible for:
// 1. Parsing the transport selection (grpc / http / prometheus, combinable)
// 2. Normalizing the backend URL and deriving the per-signal endpoints
// 3. Reading export headers and the optional trust bundle from the
//    environment
// 4. Building the exporters and SDK providers for metrics, traces and logs
//
// The push read timer (the periodic reader) runs on its own interval,
// independent of the collection timer; a failed push batch is handled by
// the exporter's retry policy and is never observed by the series store.

use opentelemetry_otlp::{
    LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig, WithHttpConfig,
    WithTonicConfig,
};
use opentelemetry_sdk::logs::{
    BatchConfigBuilder as LogBatchConfigBuilder, BatchLogProcessor, LoggerProvider,
};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder as TraceBatchConfigBuilder, BatchSpanProcessor, TracerProvider,
};
use opentelemetry_sdk::{runtime, Resource};
use std::collections::HashMap;
use std::env;
use std::fs;
use thiserror::Error;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tonic::transport::{Certificate, ClientTlsConfig};
use tracing::{error, warn};

use crate::config::InstanceSettings;

pub const METRICS_PATH: &str = "/v1/metrics";
pub const TRACES_PATH: &str = "/v1/traces";
pub const LOGS_PATH: &str = "/v1/logs";

/// Environment variable holding comma-separated `k=v` export headers.
pub const OTLP_HEADERS_ENV: &str = "OTEL_EXPORTER_OTLP_HEADERS";

/// Environment variable holding the path of a PEM trust bundle.
pub const OTLP_CERTIFICATE_ENV: &str = "OTEL_EXPORTER_OTLP_CERTIFICATE";

const GRPC: &str = "grpc";
const HTTP: &str = "http";
const PROMETHEUS: &str = "prometheus";

/// Errors that can occur while building the export pipeline
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("invalid export header '{0}'")]
    InvalidHeader(String),

    #[error("failed to build exporter: {0}")]
    Build(String),
}

/// The set of export transports active for one instance.
///
/// Transports combine: `"grpc,prometheus"` pushes over gRPC and serves the
/// scrape endpoint at the same time. When both push transports are named,
/// gRPC wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportSelection {
    pub grpc: bool,
    pub http: bool,
    pub prometheus: bool,
}

impl TransportSelection {
    /// Parses a comma-separated transport list. Unknown tokens are
    /// rejected so that a typo fails the instance at startup instead of
    /// silently exporting nothing.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut selection = TransportSelection::default();
        for token in raw.split(',') {
            let token = token.trim().to_ascii_lowercase();
            match token.as_str() {
                GRPC => selection.grpc = true,
                HTTP => selection.http = true,
                PROMETHEUS => selection.prometheus = true,
                "" => {}
                other => return Err(other.to_string()),
            }
        }
        Ok(selection)
    }

    /// True when a push transport (gRPC or HTTP) is active.
    pub fn push_enabled(&self) -> bool {
        self.grpc || self.http
    }
}

/// Strips a per-signal suffix from a configured backend URL so operators
/// can paste either the base endpoint or a full signal endpoint.
pub fn normalize_backend_url(url: &str) -> String {
    for suffix in [METRICS_PATH, TRACES_PATH, LOGS_PATH] {
        if let Some(base) = url.strip_suffix(suffix) {
            return base.to_string();
        }
    }
    url.to_string()
}

/// Reads export headers from the environment. Malformed pairs are skipped.
pub fn headers_from_env() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let Ok(raw) = env::var(OTLP_HEADERS_ENV) else {
        return headers;
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
        headers.insert(key.to_string(), value.to_string());
    }
    headers
}

/// Reads the PEM trust bundle named by the environment, if any. An
/// unreadable file is logged and treated as absent.
pub fn trusted_certificate_from_env() -> Option<Vec<u8>> {
    let path = env::var(OTLP_CERTIFICATE_ENV).ok()?;
    match fs::read(&path) {
        Ok(pem) => Some(pem),
        Err(e) => {
            error!("Certificate file is invalid: {}: {}", path, e);
            None
        }
    }
}

/// Converts plain headers into gRPC metadata.
fn metadata_from_headers(headers: &HashMap<String, String>) -> Result<MetadataMap, ExportError> {
    let mut metadata = MetadataMap::new();
    for (name, value) in headers {
        let key: MetadataKey<_> = name
            .parse()
            .map_err(|_| ExportError::InvalidHeader(name.clone()))?;
        let value: MetadataValue<_> = value
            .parse()
            .map_err(|_| ExportError::InvalidHeader(name.clone()))?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

/// Builds the OTLP metric exporter for the selected push transport.
pub fn build_metric_exporter(settings: &InstanceSettings) -> Result<MetricExporter, ExportError> {
    let headers = headers_from_env();
    let cert = trusted_certificate_from_env();

    if settings.transport.grpc {
        let mut builder = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(settings.backend_url.clone())
            .with_timeout(settings.transport_timeout)
            .with_metadata(metadata_from_headers(&headers)?);
        if let Some(pem) = cert {
            builder = builder
                .with_tls_config(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem)));
        }
        builder.build().map_err(|e| ExportError::Build(e.to_string()))
    } else {
        if cert.is_some() {
            warn!("Trust bundles apply to the grpc transport; the http exporter uses system roots");
        }
        MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{}{}", settings.backend_url, METRICS_PATH))
            .with_timeout(settings.transport_timeout)
            .with_headers(headers)
            .build()
            .map_err(|e| ExportError::Build(e.to_string()))
    }
}

/// Builds the OTLP span exporter for the selected push transport.
pub fn build_span_exporter(settings: &InstanceSettings) -> Result<SpanExporter, ExportError> {
    let headers = headers_from_env();
    let cert = trusted_certificate_from_env();

    if settings.transport.grpc {
        let mut builder = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(settings.backend_url.clone())
            .with_timeout(settings.transport_timeout)
            .with_metadata(metadata_from_headers(&headers)?);
        if let Some(pem) = cert {
            builder = builder
                .with_tls_config(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem)));
        }
        builder.build().map_err(|e| ExportError::Build(e.to_string()))
    } else {
        SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{}{}", settings.backend_url, TRACES_PATH))
            .with_timeout(settings.transport_timeout)
            .with_headers(headers)
            .build()
            .map_err(|e| ExportError::Build(e.to_string()))
    }
}

/// Builds the OTLP log exporter for the selected push transport.
pub fn build_log_exporter(settings: &InstanceSettings) -> Result<LogExporter, ExportError> {
    let headers = headers_from_env();
    let cert = trusted_certificate_from_env();

    if settings.transport.grpc {
        let mut builder = LogExporter::builder()
            .with_tonic()
            .with_endpoint(settings.backend_url.clone())
            .with_timeout(settings.transport_timeout)
            .with_metadata(metadata_from_headers(&headers)?);
        if let Some(pem) = cert {
            builder = builder
                .with_tls_config(ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem)));
        }
        builder.build().map_err(|e| ExportError::Build(e.to_string()))
    } else {
        LogExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(format!("{}{}", settings.backend_url, LOGS_PATH))
            .with_timeout(settings.transport_timeout)
            .with_headers(headers)
            .build()
            .map_err(|e| ExportError::Build(e.to_string()))
    }
}

/// Builds the meter provider for one instance.
///
/// When a push transport is active, a periodic reader drives the registered
/// read callbacks at the callback interval. With a pull-only transport the
/// provider carries no reader; the scrape path reads the series stores
/// directly.
pub fn build_meter_provider(
    settings: &InstanceSettings,
    resource: Resource,
) -> Result<SdkMeterProvider, ExportError> {
    let mut builder = SdkMeterProvider::builder().with_resource(resource);
    if settings.transport.push_enabled() {
        let exporter = build_metric_exporter(settings)?;
        let reader = PeriodicReader::builder(exporter, runtime::Tokio)
            .with_interval(settings.callback_interval)
            .build();
        builder = builder.with_reader(reader);
    }
    Ok(builder.build())
}

/// Builds the tracer provider for one instance; bare when no push
/// transport is active.
pub fn build_tracer_provider(
    settings: &InstanceSettings,
    resource: Resource,
) -> Result<TracerProvider, ExportError> {
    let mut builder = TracerProvider::builder().with_resource(resource);
    if settings.transport.push_enabled() {
        let exporter = build_span_exporter(settings)?;
        let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio)
            .with_batch_config(
                TraceBatchConfigBuilder::default()
                    .with_scheduled_delay(settings.transport_delay)
                    .build(),
            )
            .build();
        builder = builder.with_span_processor(processor);
    }
    Ok(builder.build())
}

/// Builds the logger provider for one instance; bare when no push
/// transport is active.
pub fn build_logger_provider(
    settings: &InstanceSettings,
    resource: Resource,
) -> Result<LoggerProvider, ExportError> {
    let mut builder = LoggerProvider::builder().with_resource(resource);
    if settings.transport.push_enabled() {
        let exporter = build_log_exporter(settings)?;
        let processor = BatchLogProcessor::builder(exporter, runtime::Tokio)
            .with_batch_config(
                LogBatchConfigBuilder::default()
                    .with_scheduled_delay(settings.transport_delay)
                    .build(),
            )
            .build();
        builder = builder.with_log_processor(processor);
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_parse_combinations() {
        let selection = TransportSelection::parse("grpc, prometheus").unwrap();
        assert!(selection.grpc);
        assert!(selection.prometheus);
        assert!(!selection.http);
        assert!(selection.push_enabled());

        let pull_only = TransportSelection::parse("prometheus").unwrap();
        assert!(!pull_only.push_enabled());

        assert!(TransportSelection::parse("udp").is_err());
    }

    #[test]
    fn test_transport_parse_is_case_insensitive() {
        let selection = TransportSelection::parse("GRPC").unwrap();
        assert!(selection.grpc);
    }

    #[test]
    fn test_normalize_backend_url_strips_signal_suffixes() {
        assert_eq!(
            normalize_backend_url("http://host:4318/v1/metrics"),
            "http://host:4318"
        );
        assert_eq!(
            normalize_backend_url("http://host:4318/v1/traces"),
            "http://host:4318"
        );
        assert_eq!(
            normalize_backend_url("http://host:4318/v1/logs"),
            "http://host:4318"
        );
        assert_eq!(normalize_backend_url("http://host:4318"), "http://host:4318");
    }

    #[tokio::test]
    async fn test_pull_only_providers_carry_no_push_pipeline() {
        let mut props = crate::config::InstanceProperties::default();
        props.insert(crate::config::TRANSPORT, "prometheus");
        let settings = crate::config::InstanceSettings::from_properties(&props).unwrap();

        assert!(build_meter_provider(&settings, Resource::default()).is_ok());
        assert!(build_tracer_provider(&settings, Resource::default()).is_ok());
        assert!(build_logger_provider(&settings, Resource::default()).is_ok());
    }

    #[test]
    fn test_metadata_rejects_invalid_header_names() {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), "secret".to_string());
        assert!(metadata_from_headers(&headers).is_ok());

        let mut bad = HashMap::new();
        bad.insert("not a header".to_string(), "v".to_string());
        assert!(matches!(
            metadata_from_headers(&bad),
            Err(ExportError::InvalidHeader(_))
        ));
    }
}
