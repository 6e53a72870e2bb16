// Agent module - boots collector instances from configuration and owns the
// process-wide shared state
//
// The agent reads the configuration document, creates one plugin instance
// per configured entry and drives each through the fixed initialization
// order. A startup failure aborts that instance only; the others keep
// running. The agent also owns the two pieces of cross-instance state: the
// once-per-kind plugin initialization guard and the shared scrape endpoint.

use futures_util::future::join_all;
use once_cell::sync::OnceCell;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_sdk::Resource;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::collectors::{create_plugin, CollectorPlugin};
use crate::config::{AgentConfig, ConfigError, InstanceProperties, InstanceSettings};
use crate::export::{self, ExportError};
use crate::prometheus::reader::ScrapeReader;
use crate::prometheus::server::{ScrapeEndpoint, ScrapeServerError};
use crate::registry::{MetricFilter, MetricRegistry};
use crate::resource::{base_enricher, default_prometheus_attribute_filter};
use crate::scheduler::{spawn_collection_loop, InstanceState, PluginInitGuard, RunningInstance};

/// Errors that can occur while starting the agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("export setup failed: {0}")]
    Export(#[from] ExportError),

    #[error("scrape endpoint failed: {0}")]
    Scrape(#[from] ScrapeServerError),

    #[error("unknown collector plugin '{0}'")]
    UnknownPlugin(String),

    #[error("plugin startup failed: {0}")]
    PluginStartup(String),

    #[error("no collector instance could be started")]
    NoRunningInstances,
}

/// The telemetry-collection agent: all collector instances of one process.
pub struct Agent {
    config: AgentConfig,
    instances: Vec<RunningInstance>,
    init_guard: PluginInitGuard,
    scrape_endpoint: OnceCell<Arc<ScrapeEndpoint>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Agent {
            config,
            instances: Vec::new(),
            init_guard: PluginInitGuard::new(),
            scrape_endpoint: OnceCell::new(),
        }
    }

    /// Starts every configured instance.
    ///
    /// A failing instance is logged and skipped; the call errors only when
    /// the plugin kind is unknown or no instance at all could be started.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        let kind = self.config.plugin.clone();
        let instance_maps = self.config.instances.clone();
        info!(
            "Starting {} instance(s) of the '{}' collector",
            instance_maps.len(),
            kind
        );

        for (index, props) in instance_maps.iter().enumerate() {
            let plugin =
                create_plugin(&kind).ok_or_else(|| AgentError::UnknownPlugin(kind.clone()))?;
            match self.start_instance(index, plugin, props).await {
                Ok(instance) => {
                    info!(instance = instance.name(), "Collector instance running");
                    self.instances.push(instance);
                }
                Err(e) => {
                    error!("Instance no.{} failed to start: {}", index + 1, e);
                }
            }
        }

        if self.instances.is_empty() {
            return Err(AgentError::NoRunningInstances);
        }
        info!("{} collector instance(s) running", self.instances.len());
        Ok(())
    }

    /// Drives one instance through the fixed initialization order: metric
    /// catalog, built-in parameters, plugin parameters, once-per-kind
    /// initialization, parameter processing, instrument registration, and
    /// finally the polling loop.
    async fn start_instance(
        &self,
        index: usize,
        mut plugin: Box<dyn CollectorPlugin>,
        props: &InstanceProperties,
    ) -> Result<RunningInstance, AgentError> {
        let state = Arc::new(Mutex::new(InstanceState::Uninitialized));

        // The catalog exists before any configuration is read.
        let catalog = plugin.initial_metric_catalog();
        let settings = InstanceSettings::from_properties(props)?;
        let registry = Arc::new(MetricRegistry::new(
            catalog,
            MetricFilter::new(settings.metric_restrictions.clone()),
        ));

        plugin.read_extra_parameters(props)?;

        if self.init_guard.first_for(plugin.kind()) {
            plugin
                .init_once()
                .await
                .map_err(|e| AgentError::PluginStartup(e.to_string()))?;
        }

        plugin
            .process_parameters(props)
            .await
            .map_err(|e| AgentError::PluginStartup(e.to_string()))?;

        let mut enricher = base_enricher(
            &settings.service_name,
            settings.service_instance_id.as_deref(),
        );
        plugin.enrich_resource_attributes(&mut enricher);

        let meter_provider =
            export::build_meter_provider(&settings, Resource::new(enricher.to_key_values()))?;
        let meter = meter_provider.meter("telemetry-collector");
        registry.bind_instruments(&meter);

        if settings.transport.prometheus {
            let endpoint = self.scrape_endpoint(&settings)?;
            let filter = plugin.prometheus_resource_filter(default_prometheus_attribute_filter());
            endpoint.register_reader(Arc::new(ScrapeReader::new(
                Arc::clone(&registry),
                enricher.attributes(),
                filter,
                settings.prometheus_metric_restrictions.clone(),
            )));
        }

        *state.lock() = InstanceState::Configured;

        let name = settings
            .service_instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", plugin.kind(), index + 1));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_collection_loop(
            plugin,
            Arc::clone(&registry),
            settings.poll_interval,
            shutdown_rx,
        );
        *state.lock() = InstanceState::Running;

        Ok(RunningInstance::new(
            name,
            state,
            registry,
            shutdown_tx,
            task,
            Some(meter_provider),
        ))
    }

    /// The shared scrape endpoint, created lazily on first use and never
    /// recreated; the first instance's host/port settings win.
    fn scrape_endpoint(
        &self,
        settings: &InstanceSettings,
    ) -> Result<&Arc<ScrapeEndpoint>, AgentError> {
        Ok(self.scrape_endpoint.get_or_try_init(|| {
            ScrapeEndpoint::start(&settings.prometheus_host, settings.prometheus_port).map(Arc::new)
        })?)
    }

    /// Address the scrape endpoint is bound to, when one was created.
    pub fn scrape_address(&self) -> Option<SocketAddr> {
        self.scrape_endpoint
            .get()
            .map(|endpoint| endpoint.local_address())
    }

    pub fn instances(&self) -> &[RunningInstance] {
        &self.instances
    }

    /// Stops every instance, flushes push exporters and closes the scrape
    /// listener.
    pub async fn shutdown(&mut self) {
        info!("Shutting down {} collector instance(s)", self.instances.len());
        join_all(self.instances.drain(..).map(|instance| instance.stop())).await;
        if let Some(endpoint) = self.scrape_endpoint.get() {
            endpoint.shutdown();
        }
        info!("Agent shutdown complete");
    }
}
