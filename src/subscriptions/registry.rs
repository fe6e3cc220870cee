//! Directory of named stores.

use super::manager::ManagedStore;
use super::types::{GlobalStoreStats, StoreConfig};
use crate::scheduler::Scheduler;
use crate::telemetry::Telemetry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Stores with more active subscriptions than this are listed by `log_summary`.
const SUMMARY_LISTING_THRESHOLD: usize = 10;

/// Get-or-create directory of [`ManagedStore`]s.
///
/// Each store exclusively owns its subscription records; the directory only
/// hands out shared handles and aggregates their stats.
pub struct StoreRegistry {
    config: StoreConfig,
    telemetry: Arc<Telemetry>,
    scheduler: Arc<dyn Scheduler>,
    stores: RwLock<HashMap<String, Arc<ManagedStore>>>,
}

impl StoreRegistry {
    pub fn new(config: StoreConfig, telemetry: Arc<Telemetry>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            config,
            telemetry,
            scheduler,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Return the store named `name`, creating it on first use.
    pub fn register_store(&self, name: &str) -> Arc<ManagedStore> {
        if let Some(store) = self.stores.read().get(name) {
            return Arc::clone(store);
        }
        let mut stores = self.stores.write();
        Arc::clone(stores.entry(name.to_string()).or_insert_with(|| {
            ManagedStore::new(
                name,
                self.config.clone(),
                Arc::clone(&self.telemetry),
                Arc::clone(&self.scheduler),
            )
        }))
    }

    pub fn get_store(&self, name: &str) -> Option<Arc<ManagedStore>> {
        self.stores.read().get(name).cloned()
    }

    /// Names of every registered store, sorted.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn all_stores(&self) -> Vec<Arc<ManagedStore>> {
        self.stores.read().values().cloned().collect()
    }

    /// Close every subscription in every store.
    pub fn global_cleanup(&self) -> usize {
        let total: usize = self.all_stores().iter().map(|s| s.close_all()).sum();
        if total > 0 {
            info!(cleaned = total, "global subscription cleanup");
        }
        total
    }

    pub fn global_stats(&self) -> GlobalStoreStats {
        let mut stores: Vec<_> = self.all_stores().iter().map(|s| s.stats()).collect();
        stores.sort_by(|a, b| a.store_name.cmp(&b.store_name));
        GlobalStoreStats {
            total_stores: stores.len(),
            total_active_subscriptions: stores.iter().map(|s| s.active_subscriptions).sum(),
            stores,
        }
    }

    /// Log a global summary when the total active count is high.
    ///
    /// Returns the stats the summary was computed from.
    pub fn log_summary(&self) -> GlobalStoreStats {
        let stats = self.global_stats();
        let limits = self.telemetry.config();
        let total = stats.total_active_subscriptions;

        if total > limits.global_leak_total {
            error!(total, stores = stats.total_stores, "critical subscription count across stores");
        } else if total > limits.global_warning_total {
            warn!(total, stores = stats.total_stores, "high subscription count across stores");
        } else {
            return stats;
        }

        for store in stats
            .stores
            .iter()
            .filter(|s| s.active_subscriptions > SUMMARY_LISTING_THRESHOLD)
        {
            warn!(
                store = %store.store_name,
                active = store.active_subscriptions,
                created = store.total_created,
                "store over summary threshold"
            );
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::source::{Observer, Subject};
    use crate::telemetry::TelemetryConfig;

    fn registry() -> StoreRegistry {
        let scheduler = Arc::new(ManualScheduler::new());
        let telemetry = Arc::new(Telemetry::new(TelemetryConfig::default(), scheduler.clone()));
        StoreRegistry::new(StoreConfig::default(), telemetry, scheduler)
    }

    #[test]
    fn test_register_is_get_or_create() {
        let registry = registry();
        let a = registry.register_store("NpsStore");
        let b = registry.register_store("NpsStore");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get_store("Missing").is_none());

        registry.register_store("AlertsStore");
        assert_eq!(registry.store_names(), vec!["AlertsStore", "NpsStore"]);
    }

    #[test]
    fn test_global_cleanup_and_stats() {
        let registry = registry();
        let subject = Subject::with_value(0);
        let nps = registry.register_store("NpsStore");
        let alerts = registry.register_store("AlertsStore");
        for _ in 0..3 {
            nps.open(&subject, Observer::new(|_: i32| {}));
        }
        alerts.open(&subject, Observer::new(|_: i32| {}));

        let stats = registry.log_summary();
        assert_eq!(stats.total_stores, 2);
        assert_eq!(stats.total_active_subscriptions, 4);
        assert_eq!(stats.stores[1].store_name, "NpsStore");

        assert_eq!(registry.global_cleanup(), 4);
        assert_eq!(registry.global_stats().total_active_subscriptions, 0);
        assert_eq!(subject.observer_count(), 0);
    }
}
