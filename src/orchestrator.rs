//! Top-level facade wiring every subsystem to one scheduler.

use crate::diagnostics::SystemReport;
use crate::error::{Result, StreamError};
use crate::reclaim::{ReclaimPolicy, ReclaimReport, Reclaimer, SurfaceProbe};
use crate::scheduler::{Scheduler, TimerId};
use crate::stream::{DerivedStream, FactoryConfig, StreamConfig, StreamFactory};
use crate::subscriptions::{ManagedStore, StoreConfig, StoreRegistry};
use crate::telemetry::{Telemetry, TelemetryConfig};
use crate::types::{SlotValue, ViewModel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Configuration of every subsystem.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub store: StoreConfig,
    pub factory: FactoryConfig,
    pub telemetry: TelemetryConfig,
    pub reclaim: ReclaimPolicy,
}

impl OrchestratorConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.store.leak_threshold < self.store.warning_threshold {
            return Err(StreamError::Config(format!(
                "store leak threshold {} is below warning threshold {}",
                self.store.leak_threshold, self.store.warning_threshold
            )));
        }
        if self.factory.maintenance_interval_ms == 0 || self.reclaim.sweep_interval_ms == 0 {
            return Err(StreamError::Config("periodic intervals must be non-zero".into()));
        }
        Ok(())
    }
}

/// Owns the registry, telemetry, factory and reclaimer of one application.
pub struct Orchestrator {
    config: OrchestratorConfig,
    scheduler: Arc<dyn Scheduler>,
    telemetry: Arc<Telemetry>,
    registry: StoreRegistry,
    factory: Arc<StreamFactory>,
    reclaimer: Arc<Reclaimer>,
    maintenance: Mutex<Vec<TimerId>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, scheduler: Arc<dyn Scheduler>) -> Self {
        let telemetry = Arc::new(Telemetry::new(config.telemetry.clone(), Arc::clone(&scheduler)));
        let registry = StoreRegistry::new(
            config.store.clone(),
            Arc::clone(&telemetry),
            Arc::clone(&scheduler),
        );
        let factory = Arc::new(StreamFactory::new(
            config.factory.clone(),
            Arc::clone(&telemetry),
            Arc::clone(&scheduler),
        ));
        let reclaimer = Arc::new(Reclaimer::new(
            config.reclaim.clone(),
            Arc::clone(&factory),
            Arc::clone(&scheduler),
        ));

        Self {
            config,
            scheduler,
            telemetry,
            registry,
            factory,
            reclaimer,
            maintenance: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &Arc<StreamFactory> {
        &self.factory
    }

    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    // --- Shortcuts ---

    /// Get or create the managed store called `name`.
    pub fn store(&self, name: &str) -> Arc<ManagedStore> {
        self.registry.register_store(name)
    }

    pub fn create_ui_stream<I, T>(&self, config: StreamConfig<I, T>) -> DerivedStream<T>
    where
        I: SlotValue,
        T: ViewModel,
    {
        self.factory.create_ui_stream(config)
    }

    pub fn create_data_stream<I, T>(&self, config: StreamConfig<I, T>) -> DerivedStream<T>
    where
        I: SlotValue,
        T: ViewModel,
    {
        self.factory.create_data_stream(config)
    }

    pub fn on_navigation(&self, path: &str) -> ReclaimReport {
        self.reclaimer.on_navigation(path)
    }

    pub fn surface_disposed(&self, name: &str) -> bool {
        self.factory.surface_disposed(name)
    }

    pub fn set_surface_probe(&self, probe: Arc<dyn SurfaceProbe>) {
        self.reclaimer.set_probe(probe);
    }

    // --- Maintenance ---

    /// Schedule cache maintenance, telemetry pruning and periodic reclamation.
    ///
    /// Returns false if maintenance was already running.
    pub fn start_maintenance(&self) -> bool {
        let mut timers = self.maintenance.lock();
        if !timers.is_empty() {
            return false;
        }

        let factory = Arc::downgrade(&self.factory);
        let telemetry = Arc::downgrade(&self.telemetry);
        timers.push(self.scheduler.schedule_repeating(
            self.config.factory.maintenance_interval_ms,
            Arc::new(move || {
                if let Some(factory) = factory.upgrade() {
                    factory.maintain_cache();
                }
                if let Some(telemetry) = telemetry.upgrade() {
                    telemetry.prune();
                }
            }),
        ));
        self.reclaimer.start();

        info!(
            maintenance_interval_ms = self.config.factory.maintenance_interval_ms,
            sweep_interval_ms = self.config.reclaim.sweep_interval_ms,
            "maintenance started"
        );
        true
    }

    pub fn stop_maintenance(&self) -> bool {
        let timers: Vec<TimerId> = self.maintenance.lock().drain(..).collect();
        let was_running = !timers.is_empty();
        for id in timers {
            self.scheduler.cancel(id);
        }
        let reclaimer_stopped = self.reclaimer.stop();
        if was_running || reclaimer_stopped {
            debug!("maintenance stopped");
        }
        was_running || reclaimer_stopped
    }

    /// Full teardown: stop maintenance, forget every stream, force-close
    /// every managed subscription. Returns the number of subscriptions closed.
    pub fn shutdown(&self) -> usize {
        self.stop_maintenance();
        let streams = self.factory.clear_stream_cache(None);
        let closed = self.registry.global_cleanup();
        info!(streams, closed, "orchestrator shut down");
        closed
    }

    pub fn diagnostics(&self) -> SystemReport {
        SystemReport {
            timestamp: self.scheduler.now(),
            stores: self.registry.log_summary(),
            streams: self.factory.stream_stats(),
            telemetry: self.telemetry.report(),
            health: self.reclaimer.monitor_health(),
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop_maintenance();
    }
}
