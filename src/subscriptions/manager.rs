//! Per-store registry of live subscriptions.

use crate::scheduler::Scheduler;
use crate::source::{Binding, Observer, Source};
use crate::telemetry::Telemetry;
use crate::types::{SubscriptionId, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::types::{
    ManagedSubscriptionInfo, Pressure, StoreConfig, StoreStats, DEFAULT_SOURCE_KIND,
};

/// Internal subscription state.
struct ManagedSubscription {
    created_at: Timestamp,
    store_name: String,
    source_kind: String,
    active: bool,
    /// None until the source's subscribe call returns.
    binding: Option<Box<dyn Binding>>,
}

impl ManagedSubscription {
    /// Cancel the upstream binding, swallowing teardown failures.
    fn cancel(&self, id: &SubscriptionId) {
        if let Some(binding) = &self.binding {
            cancel_binding(&self.store_name, id, binding.as_ref());
        }
    }
}

fn cancel_binding(store_name: &str, id: &SubscriptionId, binding: &dyn Binding) {
    if binding.is_cancelled() {
        return;
    }
    if catch_unwind(AssertUnwindSafe(|| binding.cancel())).is_err() {
        warn!(store = %store_name, id = %id, "binding panicked during cancel");
    }
}

/// Tracks every live subscription opened on behalf of one named store.
///
/// Records exist only while active: closing a subscription cancels its
/// binding and removes the record in the same step.
pub struct ManagedStore {
    name: String,
    config: StoreConfig,
    subscriptions: RwLock<HashMap<SubscriptionId, ManagedSubscription>>,
    created_count: AtomicU64,
    telemetry: Arc<Telemetry>,
    scheduler: Arc<dyn Scheduler>,
    self_ref: Weak<ManagedStore>,
}

impl ManagedStore {
    /// Create a store. Stores are always shared, since terminal events
    /// schedule their own cleanup.
    pub fn new(
        name: impl Into<String>,
        config: StoreConfig,
        telemetry: Arc<Telemetry>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|self_ref| Self {
            name,
            config,
            subscriptions: RwLock::new(HashMap::new()),
            created_count: AtomicU64::new(0),
            telemetry,
            scheduler,
            self_ref: self_ref.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe `observer` to `source` and track the binding.
    pub fn open<T, S>(&self, source: &S, observer: Observer<T>) -> SubscriptionId
    where
        T: Send + 'static,
        S: Source<T> + ?Sized,
    {
        self.open_with_kind(source, observer, DEFAULT_SOURCE_KIND)
    }

    /// Like [`open`](Self::open), tagging the record with `kind`.
    ///
    /// The record exists before the source sees the observer, so a
    /// terminal event delivered from inside `subscribe` is cleaned up like
    /// any other.
    pub fn open_with_kind<T, S>(&self, source: &S, observer: Observer<T>, kind: &str) -> SubscriptionId
    where
        T: Send + 'static,
        S: Source<T> + ?Sized,
    {
        let created_at = self.scheduler.now();
        let id = SubscriptionId::generate(&self.name, created_at);
        self.created_count.fetch_add(1, Ordering::SeqCst);

        let active = {
            let mut subs = self.subscriptions.write();
            subs.insert(
                id.clone(),
                ManagedSubscription {
                    created_at,
                    store_name: self.name.clone(),
                    source_kind: kind.to_string(),
                    active: true,
                    binding: None,
                },
            );
            subs.len()
        };
        self.telemetry.record_open(&self.name, &id, kind);
        self.report_pressure(active);

        let binding = source.subscribe(self.wrap_observer(&id, observer));

        let orphaned = match self.subscriptions.write().get_mut(&id) {
            Some(sub) => {
                sub.binding = Some(binding);
                None
            }
            None => Some(binding),
        };
        // Closed while the source was still subscribing.
        if let Some(binding) = orphaned {
            cancel_binding(&self.name, &id, binding.as_ref());
            debug!(store = %self.name, id = %id, "binding cancelled after early close");
        }
        id
    }

    /// Route terminal events through a delayed cleanup before the caller sees them.
    fn wrap_observer<T: Send + 'static>(&self, id: &SubscriptionId, observer: Observer<T>) -> Observer<T> {
        let on_next = observer.clone();
        let on_error = observer.clone();
        let on_complete = observer;
        let (error_store, error_id) = (self.self_ref.clone(), id.clone());
        let (complete_store, complete_id) = (self.self_ref.clone(), id.clone());

        Observer::new(move |value| on_next.next(value))
            .on_error(move |err| {
                schedule_cleanup(&error_store, &error_id);
                on_error.error(err);
            })
            .on_complete(move || {
                schedule_cleanup(&complete_store, &complete_id);
                on_complete.complete();
            })
    }

    /// Cancel and remove one subscription.
    ///
    /// Returns false if the id is unknown or was already cleaned.
    pub fn close(&self, id: &SubscriptionId) -> bool {
        let removed = {
            let mut subs = self.subscriptions.write();
            match subs.get(id) {
                Some(sub) if sub.active => subs.remove(id),
                _ => None,
            }
        };

        match removed {
            Some(mut sub) => {
                sub.cancel(id);
                sub.active = false;
                self.telemetry.record_close(&self.name, id);
                debug!(store = %self.name, id = %id, "subscription closed");
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every subscription. Returns the number removed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(SubscriptionId, ManagedSubscription)> =
            self.subscriptions.write().drain().collect();

        let mut cleaned = 0;
        for (id, sub) in drained {
            if sub.active {
                sub.cancel(&id);
                self.telemetry.record_close(&self.name, &id);
                cleaned += 1;
            }
        }

        if cleaned >= 5 {
            info!(store = %self.name, cleaned, "store subscriptions cleaned");
        }
        cleaned
    }

    /// Current snapshot.
    pub fn stats(&self) -> StoreStats {
        let subs = self.subscriptions.read();
        let active: Vec<&ManagedSubscription> = subs.values().filter(|s| s.active).collect();
        StoreStats {
            store_name: self.name.clone(),
            active_subscriptions: active.len(),
            total_created: self.created_count.load(Ordering::SeqCst),
            oldest_active: active.iter().map(|s| s.created_at).min(),
            pressure: Pressure::classify(active.len(), &self.config),
        }
    }

    /// Number of active subscriptions.
    pub fn active_count(&self) -> usize {
        self.subscriptions.read().values().filter(|s| s.active).count()
    }

    /// Whether `id` is still tracked.
    pub fn contains(&self, id: &SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(id)
    }

    /// Views of every tracked subscription, oldest first.
    pub fn subscriptions(&self) -> Vec<ManagedSubscriptionInfo> {
        let mut out: Vec<ManagedSubscriptionInfo> = self
            .subscriptions
            .read()
            .iter()
            .map(|(id, sub)| ManagedSubscriptionInfo {
                id: id.clone(),
                created_at: sub.created_at,
                store_name: sub.store_name.clone(),
                source_kind: sub.source_kind.clone(),
                active: sub.active,
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    fn report_pressure(&self, active: usize) {
        match Pressure::classify(active, &self.config) {
            Pressure::Leak => {
                error!(store = %self.name, active, "probable subscription leak");
            }
            Pressure::Warning => {
                warn!(
                    store = %self.name,
                    active,
                    limit = self.config.warning_threshold,
                    "high subscription count"
                );
            }
            Pressure::Normal => {}
        }
    }
}

fn schedule_cleanup(store: &Weak<ManagedStore>, id: &SubscriptionId) {
    let Some(strong) = store.upgrade() else {
        return;
    };
    let (store, id) = (store.clone(), id.clone());
    strong.scheduler.schedule(
        strong.config.grace_delay_ms,
        Box::new(move || {
            if let Some(store) = store.upgrade() {
                store.close(&id);
            }
        }),
    );
}
