// Scheduler module - drives the periodic collection loop of each collector
// instance
//
// This module implements the core scheduling logic using Tokio tasks.
// Each collector instance runs on its own dedicated task with a fixed-delay
// timer: a slow cycle pushes later cycles out instead of piling up, and two
// cycles of the same instance never overlap.
//
// # Availability contract
// Every cycle is wrapped here: a plugin failure is caught and logged, the
// plugin's declared "source reachable" gauge is set to 0 (1 on success),
// and the timer keeps running. A dead data source degrades one metric's
// value, never the whole agent.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::collectors::CollectorPlugin;
use crate::registry::MetricRegistry;

/// How long instance shutdown waits for the collection task before
/// abandoning it; a stuck source must not block process shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one collector instance.
///
/// Transient cycle failures do not leave `Running`; they only surface
/// through the availability gauge and the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, no configuration read yet
    Uninitialized,

    /// Parameters read and processed, instruments not yet polling
    Configured,

    /// The collection timer is active
    Running,

    /// Shut down; the timer is cancelled
    Stopped,
}

/// Guards process-wide one-time plugin initialization.
///
/// However many instances of one plugin kind are configured, `init_once`
/// must run for exactly one of them. The agent owns this guard and passes
/// it by reference while starting instances.
#[derive(Debug, Default)]
pub struct PluginInitGuard {
    initialized: Mutex<HashSet<String>>,
}

impl PluginInitGuard {
    pub fn new() -> Self {
        PluginInitGuard::default()
    }

    /// Returns true exactly once per plugin kind.
    pub fn first_for(&self, kind: &str) -> bool {
        self.initialized.lock().insert(kind.to_string())
    }
}

/// Runs one collection cycle and applies the availability contract.
///
/// Public so integration tests and one-shot tooling can drive cycles
/// without the timer.
pub async fn run_cycle(plugin: &dyn CollectorPlugin, registry: &MetricRegistry) {
    match plugin.collect_data(registry).await {
        Ok(()) => {
            if let Some(status_metric) = plugin.availability_metric() {
                registry.set_value(status_metric, 1i64);
            }
        }
        Err(e) => {
            // Collection failed, log error and continue; the timer is
            // never cancelled by a cycle failure.
            error!(plugin = plugin.kind(), "Failed to collect metrics: {}", e);
            if let Some(status_metric) = plugin.availability_metric() {
                registry.set_value(status_metric, 0i64);
            }
        }
    }
}

/// Spawns the collection loop of one instance.
///
/// The timer uses fixed-delay semantics: when a cycle overruns, the missed
/// ticks are not burst-replayed, the next cycle simply starts late.
pub(crate) fn spawn_collection_loop(
    plugin: Box<dyn CollectorPlugin>,
    registry: Arc<MetricRegistry>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            plugin = plugin.kind(),
            "Starting collection loop (every {:?})", poll_interval
        );

        let mut timer = interval(poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = timer.tick() => {}
            }
            run_cycle(plugin.as_ref(), &registry).await;
        }

        debug!(plugin = plugin.kind(), "Collection loop stopped");
    })
}

/// A started collector instance: its registry, lifecycle state, shutdown
/// signal and the handles of everything it owns.
pub struct RunningInstance {
    name: String,
    state: Arc<Mutex<InstanceState>>,
    registry: Arc<MetricRegistry>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    meter_provider: Option<opentelemetry_sdk::metrics::SdkMeterProvider>,
}

impl RunningInstance {
    pub(crate) fn new(
        name: String,
        state: Arc<Mutex<InstanceState>>,
        registry: Arc<MetricRegistry>,
        shutdown: watch::Sender<bool>,
        task: JoinHandle<()>,
        meter_provider: Option<opentelemetry_sdk::metrics::SdkMeterProvider>,
    ) -> Self {
        RunningInstance {
            name,
            state,
            registry,
            shutdown,
            task,
            meter_provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Stops the collection timer, waits briefly for the task, and flushes
    /// the push pipeline.
    pub async fn stop(self) {
        info!(instance = %self.name, "Stopping collector instance");
        let _ = self.shutdown.send(true);

        if tokio::time::timeout(SHUTDOWN_GRACE, self.task).await.is_err() {
            warn!(instance = %self.name, "Collection task did not stop in time, abandoning it");
        }

        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                warn!(instance = %self.name, "Meter provider shutdown failed: {}", e);
            }
        }

        *self.state.lock() = InstanceState::Stopped;
        info!(instance = %self.name, "Collector instance stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, InstanceProperties};
    use crate::model::MetricValue;
    use crate::registry::MetricFilter;
    use crate::store::{InstrumentKind, RawMetric};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlakyPlugin {
        reachable: Arc<AtomicBool>,
        cycles: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CollectorPlugin for FlakyPlugin {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        fn initial_metric_catalog(&self) -> Vec<RawMetric> {
            vec![RawMetric::new(
                InstrumentKind::Gauge,
                "source.status",
                "source reachability",
                "{status}",
                true,
            )]
        }

        fn availability_metric(&self) -> Option<&str> {
            Some("source.status")
        }

        fn read_extra_parameters(&mut self, _props: &InstanceProperties) -> Result<(), ConfigError> {
            Ok(())
        }

        async fn collect_data(
            &self,
            _registry: &MetricRegistry,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.cycles.fetch_add(1, Ordering::SeqCst);
            if self.reachable.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("connection refused".into())
            }
        }
    }

    fn setup() -> (FlakyPlugin, Arc<MetricRegistry>, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let reachable = Arc::new(AtomicBool::new(true));
        let cycles = Arc::new(AtomicUsize::new(0));
        let plugin = FlakyPlugin {
            reachable: Arc::clone(&reachable),
            cycles: Arc::clone(&cycles),
        };
        let registry = Arc::new(MetricRegistry::new(
            plugin.initial_metric_catalog(),
            MetricFilter::allow_all(),
        ));
        (plugin, registry, reachable, cycles)
    }

    #[tokio::test]
    async fn test_cycle_sets_availability_gauge() {
        let (plugin, registry, reachable, _) = setup();

        run_cycle(&plugin, &registry).await;
        let status = registry.raw_metric("source.status").unwrap();
        assert_eq!(status.value_of(None), Some(MetricValue::Long(1)));

        reachable.store(false, Ordering::SeqCst);
        run_cycle(&plugin, &registry).await;
        assert_eq!(status.value_of(None), Some(MetricValue::Long(0)));
    }

    #[tokio::test]
    async fn test_failed_cycle_does_not_stop_the_loop() {
        let (plugin, registry, reachable, cycles) = setup();
        reachable.store(false, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_collection_loop(
            Box::new(plugin),
            Arc::clone(&registry),
            Duration::from_millis(10),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown_tx.send(true);
        task.await.unwrap();

        // The loop survived repeated failures.
        assert!(cycles.load(Ordering::SeqCst) >= 3);
        let status = registry.raw_metric("source.status").unwrap();
        assert_eq!(status.value_of(None), Some(MetricValue::Long(0)));
    }

    #[test]
    fn test_init_guard_fires_once_per_kind() {
        let guard = PluginInitGuard::new();
        assert!(guard.first_for("db"));
        assert!(!guard.first_for("db"));
        assert!(guard.first_for("mq"));
    }
}
