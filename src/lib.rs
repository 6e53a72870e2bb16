// Telemetry Collector - pluggable telemetry-collection agent
//
// Independent collector plugins poll heterogeneous sources on a timer and
// publish numeric observations as metrics, exported over batched OTLP
// (gRPC or HTTP) and/or scraped over a Prometheus-style text exposition
// endpoint shared by every instance in the process.

pub mod agent;
pub mod collectors;
pub mod config;
pub mod export;
pub mod model;
pub mod prometheus;
pub mod registry;
pub mod resource;
pub mod scheduler;
pub mod store;

pub use agent::{Agent, AgentError};
pub use collectors::CollectorPlugin;
pub use model::{AttributeValue, MetricQueryResult, MetricValue};
pub use registry::{MetricFilter, MetricRegistry};
pub use store::{CalculationMode, InstrumentKind, RawMetric};
