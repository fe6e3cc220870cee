//! Per-store subscription bookkeeping.

use super::TelemetryConfig;
use crate::types::{SubscriptionId, Timestamp};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Health classification of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthClass {
    Healthy,
    Warned,
    Leaking,
}

struct OpenSubscription {
    created_at: Timestamp,
    kind: String,
}

pub(super) struct StoreMetrics {
    store_name: String,
    open: HashMap<SubscriptionId, OpenSubscription>,
    total_created: u64,
    total_closed: u64,
    total_lifetime_ms: u64,
    last_activity: Timestamp,
}

impl StoreMetrics {
    pub(super) fn new(store_name: &str, now: Timestamp) -> Self {
        Self {
            store_name: store_name.to_string(),
            open: HashMap::new(),
            total_created: 0,
            total_closed: 0,
            total_lifetime_ms: 0,
            last_activity: now,
        }
    }

    pub(super) fn open(&mut self, id: SubscriptionId, kind: &str, now: Timestamp) {
        self.open.insert(
            id,
            OpenSubscription {
                created_at: now,
                kind: kind.to_string(),
            },
        );
        self.total_created += 1;
        self.last_activity = now;
    }

    /// Returns the closed subscription's lifetime.
    pub(super) fn close(&mut self, id: &SubscriptionId, now: Timestamp) -> Option<u64> {
        let sub = self.open.remove(id)?;
        let lifetime = now.since(sub.created_at);
        self.total_closed += 1;
        self.total_lifetime_ms += lifetime;
        self.last_activity = now;
        Some(lifetime)
    }

    pub(super) fn snapshot(&self, now: Timestamp, config: &TelemetryConfig) -> StoreMetricsSnapshot {
        let active = self.open.len();
        let oldest_active_age_ms = self
            .open
            .values()
            .map(|s| now.since(s.created_at))
            .max();

        let health = if active >= config.leak_threshold {
            HealthClass::Leaking
        } else if active >= config.warning_threshold
            || oldest_active_age_ms.is_some_and(|age| age >= config.stale_subscription_ms)
        {
            HealthClass::Warned
        } else {
            HealthClass::Healthy
        };

        let mut active_by_kind = BTreeMap::new();
        for sub in self.open.values() {
            *active_by_kind.entry(sub.kind.clone()).or_insert(0) += 1;
        }

        StoreMetricsSnapshot {
            store_name: self.store_name.clone(),
            active_subscriptions: active,
            total_created: self.total_created,
            total_closed: self.total_closed,
            average_lifetime_ms: if self.total_closed > 0 {
                self.total_lifetime_ms as f64 / self.total_closed as f64
            } else {
                0.0
            },
            oldest_active_age_ms,
            active_by_kind,
            cleanup_rate: super::percent(self.total_closed, self.total_created),
            last_activity: self.last_activity,
            health,
        }
    }
}

/// Read-only view of one store's subscription history.
#[derive(Clone, Debug, Serialize)]
pub struct StoreMetricsSnapshot {
    pub store_name: String,
    pub active_subscriptions: usize,
    pub total_created: u64,
    pub total_closed: u64,
    /// Running average lifetime of closed subscriptions.
    pub average_lifetime_ms: f64,
    pub oldest_active_age_ms: Option<u64>,
    /// Active subscriptions grouped by source kind tag.
    pub active_by_kind: BTreeMap<String, usize>,
    /// Closed over created, in percent.
    pub cleanup_rate: f64,
    pub last_activity: Timestamp,
    pub health: HealthClass,
}
