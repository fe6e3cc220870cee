//! Subscription registry types.

use crate::types::{SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};

/// Tag applied to subscriptions opened without an explicit kind.
pub const DEFAULT_SOURCE_KIND: &str = "reactive-subscription";

/// Configuration shared by every managed store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Active subscriptions before the store reports warning pressure.
    /// Default: 15
    pub warning_threshold: usize,

    /// Active subscriptions before the store reports a probable leak.
    /// Default: 25
    pub leak_threshold: usize,

    /// Delay between a terminal event and removal of its record.
    /// Default: 100ms
    pub grace_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 15,
            leak_threshold: 25,
            grace_delay_ms: 100,
        }
    }
}

/// How close a store is to its subscription limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pressure {
    Normal,
    Warning,
    Leak,
}

impl Pressure {
    pub fn classify(active: usize, config: &StoreConfig) -> Self {
        if active >= config.leak_threshold {
            Pressure::Leak
        } else if active >= config.warning_threshold {
            Pressure::Warning
        } else {
            Pressure::Normal
        }
    }

    /// True when the store needs attention.
    pub fn is_elevated(self) -> bool {
        self != Pressure::Normal
    }
}

/// Snapshot of one store, computed on demand.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStats {
    pub store_name: String,
    pub active_subscriptions: usize,
    pub total_created: u64,
    pub oldest_active: Option<Timestamp>,
    pub pressure: Pressure,
}

/// Snapshot of every registered store.
#[derive(Clone, Debug, Default, Serialize)]
pub struct GlobalStoreStats {
    pub total_stores: usize,
    pub total_active_subscriptions: usize,
    pub stores: Vec<StoreStats>,
}

/// Read-only view of one managed subscription.
#[derive(Clone, Debug, Serialize)]
pub struct ManagedSubscriptionInfo {
    pub id: SubscriptionId,
    pub created_at: Timestamp,
    pub store_name: String,
    pub source_kind: String,
    pub active: bool,
}
