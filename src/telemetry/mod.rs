//! Passive bookkeeping of subscription, stream and component activity.
//!
//! Telemetry never owns or cancels anything: it only receives
//! notifications keyed by store, stream or component name, and answers
//! "how many are alive, how old, how active". Disabling it changes
//! observability, never behavior.

mod component_metrics;
mod store_metrics;
mod stream_metrics;

pub use component_metrics::ComponentMetricsSnapshot;
pub use store_metrics::{HealthClass, StoreMetricsSnapshot};
pub use stream_metrics::{StreamActivityKind, StreamMetricsSnapshot};

use crate::scheduler::Scheduler;
use crate::types::{SubscriptionId, Timestamp};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use component_metrics::ComponentMetrics;
use std::sync::Arc;
use store_metrics::StoreMetrics;
use stream_metrics::StreamMetrics;
use tracing::debug;

/// Telemetry thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// When false every `record_*` call is a no-op.
    pub enabled: bool,
    /// Active subscriptions per store before it is classed as warned.
    pub warning_threshold: usize,
    /// Active subscriptions per store before it is classed as leaking.
    pub leak_threshold: usize,
    /// An active subscription older than this marks its store as warned.
    pub stale_subscription_ms: u64,
    /// Stream and component metrics idle longer than this are dropped by `prune`.
    pub metrics_retention_ms: u64,
    /// Total active subscriptions across stores before a global warning.
    pub global_warning_total: usize,
    /// Total active subscriptions across stores before a global leak alert.
    pub global_leak_total: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            warning_threshold: 15,
            leak_threshold: 25,
            stale_subscription_ms: 5 * 60 * 1000,
            metrics_retention_ms: 24 * 60 * 60 * 1000,
            global_warning_total: 30,
            global_leak_total: 50,
        }
    }
}

/// Aggregates over every store and stream.
#[derive(Clone, Debug, Default, Serialize)]
pub struct TelemetryTotals {
    pub stores: usize,
    pub active_subscriptions: usize,
    pub subscriptions_created: u64,
    pub subscriptions_closed: u64,
    pub streams: usize,
    pub stream_subscriptions: u64,
    /// Cache hits over lookups, in percent.
    pub cache_efficiency: f64,
    pub average_response_ms: f64,
    /// Errors over subscriptions, in percent.
    pub error_rate: f64,
    pub components: usize,
    /// Mounted component instances not yet unmounted.
    pub active_components: u64,
}

/// Diagnostic view of everything telemetry has observed.
#[derive(Clone, Debug, Serialize)]
pub struct TelemetryReport {
    pub timestamp: Timestamp,
    pub stores: Vec<StoreMetricsSnapshot>,
    pub streams: Vec<StreamMetricsSnapshot>,
    pub components: Vec<ComponentMetricsSnapshot>,
    pub totals: TelemetryTotals,
    pub recommendations: Vec<String>,
}

/// Observer of subscription lifecycles and stream activity.
pub struct Telemetry {
    config: TelemetryConfig,
    clock: Arc<dyn Scheduler>,
    stores: RwLock<HashMap<String, StoreMetrics>>,
    streams: RwLock<HashMap<String, StreamMetrics>>,
    components: RwLock<HashMap<String, ComponentMetrics>>,
}

impl Telemetry {
    pub fn new(config: TelemetryConfig, clock: Arc<dyn Scheduler>) -> Self {
        Self {
            config,
            clock,
            stores: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            components: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    // --- Store events ---

    /// A managed subscription was opened.
    pub fn record_open(&self, store_name: &str, id: &SubscriptionId, kind: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        self.stores
            .write()
            .entry(store_name.to_string())
            .or_insert_with(|| StoreMetrics::new(store_name, now))
            .open(id.clone(), kind, now);
    }

    /// A managed subscription was closed. Unknown ids are ignored.
    pub fn record_close(&self, store_name: &str, id: &SubscriptionId) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        if let Some(metrics) = self.stores.write().get_mut(store_name) {
            if let Some(lifetime) = metrics.close(id, now) {
                debug!(store = %store_name, id = %id, lifetime_ms = lifetime, "subscription closed");
            }
        }
    }

    // --- Stream events ---

    /// Record one event for a stream, registering it on first sight.
    pub fn record_stream(&self, stream_name: &str, kind: StreamActivityKind) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        self.streams
            .write()
            .entry(stream_name.to_string())
            .or_insert_with(|| StreamMetrics::new(stream_name, now))
            .record(kind, now);
    }

    // --- Component events ---

    /// A component instance mounted.
    pub fn record_component_mount(&self, component_name: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        self.components
            .write()
            .entry(component_name.to_string())
            .or_insert_with(|| ComponentMetrics::new(component_name, now))
            .mount(now);
    }

    /// A component instance unmounted. Unknown components are ignored.
    pub fn record_component_unmount(&self, component_name: &str) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        if let Some(metrics) = self.components.write().get_mut(component_name) {
            metrics.unmount(now);
        }
    }

    /// A component rendered, optionally reporting how long it took.
    /// Renders of components never mounted are ignored.
    pub fn record_component_render(&self, component_name: &str, duration_ms: Option<u64>) {
        if !self.config.enabled {
            return;
        }
        let now = self.clock.now();
        if let Some(metrics) = self.components.write().get_mut(component_name) {
            metrics.render(duration_ms, now);
        }
    }

    // --- Queries ---

    /// Snapshot for one store.
    pub fn store_snapshot(&self, store_name: &str) -> Option<StoreMetricsSnapshot> {
        let now = self.clock.now();
        self.stores
            .read()
            .get(store_name)
            .map(|m| m.snapshot(now, &self.config))
    }

    /// Snapshot for one stream.
    pub fn stream_snapshot(&self, stream_name: &str) -> Option<StreamMetricsSnapshot> {
        self.streams.read().get(stream_name).map(|m| m.snapshot())
    }

    /// Snapshot for one component.
    pub fn component_snapshot(&self, component_name: &str) -> Option<ComponentMetricsSnapshot> {
        let now = self.clock.now();
        self.components
            .read()
            .get(component_name)
            .map(|m| m.snapshot(now, &self.config))
    }

    /// Aggregated view for diagnostics.
    pub fn report(&self) -> TelemetryReport {
        let now = self.clock.now();

        let mut stores: Vec<StoreMetricsSnapshot> = self
            .stores
            .read()
            .values()
            .map(|m| m.snapshot(now, &self.config))
            .collect();
        stores.sort_by(|a, b| a.store_name.cmp(&b.store_name));

        let mut streams: Vec<StreamMetricsSnapshot> =
            self.streams.read().values().map(|m| m.snapshot()).collect();
        streams.sort_by(|a, b| a.stream_name.cmp(&b.stream_name));

        let mut components: Vec<ComponentMetricsSnapshot> = self
            .components
            .read()
            .values()
            .map(|m| m.snapshot(now, &self.config))
            .collect();
        components.sort_by(|a, b| a.component_name.cmp(&b.component_name));

        let totals = Self::totals(&stores, &streams, &components);
        let recommendations = self.recommendations(&stores, &streams, &components, &totals);

        TelemetryReport {
            timestamp: now,
            stores,
            streams,
            components,
            totals,
            recommendations,
        }
    }

    fn totals(
        stores: &[StoreMetricsSnapshot],
        streams: &[StreamMetricsSnapshot],
        components: &[ComponentMetricsSnapshot],
    ) -> TelemetryTotals {
        let active_subscriptions = stores.iter().map(|s| s.active_subscriptions).sum();
        let subscriptions_created = stores.iter().map(|s| s.total_created).sum();
        let subscriptions_closed = stores.iter().map(|s| s.total_closed).sum();

        let stream_subscriptions: u64 = streams.iter().map(|s| s.subscription_count).sum();
        let hits: u64 = streams.iter().map(|s| s.cache_hits).sum();
        let misses: u64 = streams.iter().map(|s| s.cache_misses).sum();
        let errors: u64 = streams.iter().map(|s| s.errors).sum();
        let timed: u64 = streams.iter().map(|s| s.timed_loads).sum();
        let load_ms: u64 = streams.iter().map(|s| s.total_load_ms).sum();

        TelemetryTotals {
            stores: stores.len(),
            active_subscriptions,
            subscriptions_created,
            subscriptions_closed,
            streams: streams.len(),
            stream_subscriptions,
            cache_efficiency: percent(hits, hits + misses),
            average_response_ms: if timed > 0 {
                load_ms as f64 / timed as f64
            } else {
                0.0
            },
            error_rate: percent(errors, stream_subscriptions),
            components: components.len(),
            active_components: components.iter().map(|c| c.active_instances).sum(),
        }
    }

    fn recommendations(
        &self,
        stores: &[StoreMetricsSnapshot],
        streams: &[StreamMetricsSnapshot],
        components: &[ComponentMetricsSnapshot],
        totals: &TelemetryTotals,
    ) -> Vec<String> {
        let mut out = Vec::new();

        if totals.active_subscriptions > self.config.global_leak_total {
            out.push(format!(
                "{} active subscriptions across stores; review cleanup logic",
                totals.active_subscriptions
            ));
        }

        let leaking: Vec<&str> = stores
            .iter()
            .filter(|s| s.health == HealthClass::Leaking)
            .map(|s| s.store_name.as_str())
            .collect();
        if !leaking.is_empty() {
            out.push(format!("Stores leaking subscriptions: {}", leaking.join(", ")));
        }

        let lookups = streams.iter().map(|s| s.cache_hits + s.cache_misses).sum::<u64>();
        if lookups > 0 && totals.cache_efficiency < 70.0 {
            out.push("Cache efficiency below 70%; consider a longer cache duration".to_string());
        }
        if totals.error_rate > 5.0 {
            out.push("Error rate above 5%; review error handling".to_string());
        }
        if totals.average_response_ms > 300.0 {
            out.push("Average response above 300ms; optimize initial loaders".to_string());
        }

        let slow: Vec<&str> = streams
            .iter()
            .filter(|s| s.average_load_ms > 500.0)
            .map(|s| s.stream_name.as_str())
            .collect();
        if !slow.is_empty() {
            out.push(format!("Slow streams: {}", slow.join(", ")));
        }

        let noisy: Vec<&str> = streams
            .iter()
            .filter(|s| s.errors > 10)
            .map(|s| s.stream_name.as_str())
            .collect();
        if !noisy.is_empty() {
            out.push(format!("Streams with frequent errors: {}", noisy.join(", ")));
        }

        let mut orphaned: Vec<&ComponentMetricsSnapshot> = components
            .iter()
            .filter(|c| c.health == HealthClass::Leaking)
            .collect();
        orphaned.sort_by(|a, b| b.active_instances.cmp(&a.active_instances));
        if !orphaned.is_empty() {
            let names: Vec<&str> = orphaned.iter().map(|c| c.component_name.as_str()).collect();
            out.push(format!("Components without cleanup: {}", names.join(", ")));
        }

        out
    }

    /// Drop stream and component metrics idle beyond the retention window.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let retention = self.config.metrics_retention_ms;

        let mut streams = self.streams.write();
        let before = streams.len();
        streams.retain(|_, m| now.since(m.last_activity()) < retention);
        let mut pruned = before - streams.len();
        drop(streams);

        let mut components = self.components.write();
        let before = components.len();
        components.retain(|_, m| now.since(m.last_activity()) < retention);
        pruned += before - components.len();
        pruned
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.stores.write().clear();
        self.streams.write().clear();
        self.components.write().clear();
    }
}

pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    fn telemetry() -> (Arc<ManualScheduler>, Telemetry) {
        let scheduler = Arc::new(ManualScheduler::new());
        let telemetry = Telemetry::new(TelemetryConfig::default(), scheduler.clone());
        (scheduler, telemetry)
    }

    #[test]
    fn test_open_close_lifetime_average() {
        let (clock, telemetry) = telemetry();
        let a = SubscriptionId("s_a".into());
        let b = SubscriptionId("s_b".into());

        telemetry.record_open("store", &a, "reactive-subscription");
        telemetry.record_open("store", &b, "reactive-subscription");
        clock.advance(100);
        telemetry.record_close("store", &a);
        clock.advance(200);
        telemetry.record_close("store", &b);

        let snap = telemetry.store_snapshot("store").unwrap();
        assert_eq!(snap.active_subscriptions, 0);
        assert_eq!(snap.total_created, 2);
        assert_eq!(snap.total_closed, 2);
        assert_eq!(snap.average_lifetime_ms, 200.0);
        assert_eq!(snap.health, HealthClass::Healthy);
    }

    #[test]
    fn test_unknown_close_is_ignored() {
        let (_clock, telemetry) = telemetry();
        telemetry.record_close("nowhere", &SubscriptionId("x".into()));
        telemetry.record_open("store", &SubscriptionId("a".into()), "k");
        telemetry.record_close("store", &SubscriptionId("other".into()));
        let snap = telemetry.store_snapshot("store").unwrap();
        assert_eq!(snap.active_subscriptions, 1);
        assert_eq!(snap.total_closed, 0);
    }

    #[test]
    fn test_health_classes() {
        let (clock, telemetry) = telemetry();
        for i in 0..15 {
            telemetry.record_open("busy", &SubscriptionId(format!("b{}", i)), "k");
        }
        assert_eq!(telemetry.store_snapshot("busy").unwrap().health, HealthClass::Warned);

        for i in 15..25 {
            telemetry.record_open("busy", &SubscriptionId(format!("b{}", i)), "k");
        }
        assert_eq!(telemetry.store_snapshot("busy").unwrap().health, HealthClass::Leaking);

        telemetry.record_open("old", &SubscriptionId("o".into()), "k");
        assert_eq!(telemetry.store_snapshot("old").unwrap().health, HealthClass::Healthy);
        clock.advance(5 * 60 * 1000);
        assert_eq!(telemetry.store_snapshot("old").unwrap().health, HealthClass::Warned);

        let report = telemetry.report();
        assert!(report.recommendations.iter().any(|r| r.contains("busy")));
    }

    #[test]
    fn test_stream_metrics_and_totals() {
        let (_clock, telemetry) = telemetry();
        telemetry.record_stream("kpis", StreamActivityKind::CacheMiss);
        telemetry.record_stream("kpis", StreamActivityKind::CacheHit);
        telemetry.record_stream("kpis", StreamActivityKind::CacheHit);
        telemetry.record_stream("kpis", StreamActivityKind::CacheHit);
        telemetry.record_stream("kpis", StreamActivityKind::Subscription { duration_ms: Some(50) });
        telemetry.record_stream("kpis", StreamActivityKind::Subscription { duration_ms: Some(650) });

        let report = telemetry.report();
        assert_eq!(report.totals.streams, 1);
        assert_eq!(report.totals.cache_efficiency, 75.0);
        assert_eq!(report.totals.average_response_ms, 350.0);

        let snap = telemetry.stream_snapshot("kpis").unwrap();
        assert_eq!(snap.fast_responses, 1);
        assert_eq!(snap.slow_responses, 1);
        assert!(report.recommendations.iter().any(|r| r.contains("300ms")));
    }

    #[test]
    fn test_disabled_records_nothing() {
        let scheduler = Arc::new(ManualScheduler::new());
        let telemetry = Telemetry::new(
            TelemetryConfig {
                enabled: false,
                ..Default::default()
            },
            scheduler,
        );
        telemetry.record_open("store", &SubscriptionId("a".into()), "k");
        telemetry.record_stream("kpis", StreamActivityKind::Error);
        telemetry.record_component_mount("KpiCard");
        let report = telemetry.report();
        assert!(report.stores.is_empty());
        assert!(report.streams.is_empty());
        assert!(report.components.is_empty());
    }

    #[test]
    fn test_prune_idle_streams() {
        let (clock, telemetry) = telemetry();
        telemetry.record_stream("old", StreamActivityKind::CacheMiss);
        clock.advance(24 * 60 * 60 * 1000);
        telemetry.record_stream("fresh", StreamActivityKind::CacheMiss);
        assert_eq!(telemetry.prune(), 1);
        assert!(telemetry.stream_snapshot("old").is_none());
        assert!(telemetry.stream_snapshot("fresh").is_some());
    }

    #[test]
    fn test_component_render_average() {
        let (_clock, telemetry) = telemetry();
        telemetry.record_component_render("KpiCard", Some(40));
        assert!(telemetry.component_snapshot("KpiCard").is_none());

        telemetry.record_component_mount("KpiCard");
        telemetry.record_component_render("KpiCard", Some(10));
        telemetry.record_component_render("KpiCard", Some(30));
        telemetry.record_component_render("KpiCard", None);
        telemetry.record_component_unmount("KpiCard");
        telemetry.record_component_unmount("Unknown");

        let snap = telemetry.component_snapshot("KpiCard").unwrap();
        assert_eq!(snap.mounts, 1);
        assert_eq!(snap.unmounts, 1);
        assert_eq!(snap.active_instances, 0);
        assert_eq!(snap.renders, 3);
        assert_eq!(snap.average_render_ms, 20.0);
        assert_eq!(snap.health, HealthClass::Healthy);
        assert!(telemetry.component_snapshot("Unknown").is_none());
    }

    #[test]
    fn test_component_mount_deficit_health() {
        let (clock, telemetry) = telemetry();
        for _ in 0..2 {
            telemetry.record_component_mount("NpsModal");
        }
        assert_eq!(telemetry.component_snapshot("NpsModal").unwrap().health, HealthClass::Healthy);

        clock.advance(5 * 60 * 1000);
        assert_eq!(telemetry.component_snapshot("NpsModal").unwrap().health, HealthClass::Warned);

        telemetry.record_component_mount("NpsModal");
        let snap = telemetry.component_snapshot("NpsModal").unwrap();
        assert_eq!(snap.active_instances, 3);
        assert_eq!(snap.health, HealthClass::Leaking);

        telemetry.record_component_mount("SideMenu");
        let report = telemetry.report();
        assert_eq!(report.totals.components, 2);
        assert_eq!(report.totals.active_components, 4);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r == "Components without cleanup: NpsModal"));

        telemetry.record_component_unmount("NpsModal");
        assert_eq!(telemetry.component_snapshot("NpsModal").unwrap().health, HealthClass::Healthy);
    }

    #[test]
    fn test_prune_and_reset_cover_components() {
        let (clock, telemetry) = telemetry();
        telemetry.record_component_mount("OldCard");
        clock.advance(24 * 60 * 60 * 1000);
        telemetry.record_component_mount("FreshCard");

        assert_eq!(telemetry.prune(), 1);
        assert!(telemetry.component_snapshot("OldCard").is_none());
        assert!(telemetry.component_snapshot("FreshCard").is_some());

        telemetry.reset();
        assert!(telemetry.report().components.is_empty());
    }
}
