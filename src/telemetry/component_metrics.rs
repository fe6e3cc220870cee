//! Per-component mount and render bookkeeping.

use super::{HealthClass, TelemetryConfig};
use crate::types::Timestamp;
use serde::Serialize;

/// Mounted instances beyond this many without a matching unmount are a leak.
const ORPHAN_DEFICIT: u64 = 2;

pub(super) struct ComponentMetrics {
    component_name: String,
    mounts: u64,
    unmounts: u64,
    renders: u64,
    timed_renders: u64,
    total_render_ms: u64,
    last_activity: Timestamp,
}

impl ComponentMetrics {
    pub(super) fn new(component_name: &str, now: Timestamp) -> Self {
        Self {
            component_name: component_name.to_string(),
            mounts: 0,
            unmounts: 0,
            renders: 0,
            timed_renders: 0,
            total_render_ms: 0,
            last_activity: now,
        }
    }

    pub(super) fn mount(&mut self, now: Timestamp) {
        self.mounts += 1;
        self.last_activity = now;
    }

    pub(super) fn unmount(&mut self, now: Timestamp) {
        self.unmounts += 1;
        self.last_activity = now;
    }

    pub(super) fn render(&mut self, duration_ms: Option<u64>, now: Timestamp) {
        self.renders += 1;
        if let Some(ms) = duration_ms {
            self.timed_renders += 1;
            self.total_render_ms += ms;
        }
        self.last_activity = now;
    }

    pub(super) fn last_activity(&self) -> Timestamp {
        self.last_activity
    }

    fn active_instances(&self) -> u64 {
        self.mounts.saturating_sub(self.unmounts)
    }

    pub(super) fn snapshot(&self, now: Timestamp, config: &TelemetryConfig) -> ComponentMetricsSnapshot {
        let active = self.active_instances();
        let health = if active > ORPHAN_DEFICIT {
            HealthClass::Leaking
        } else if active > 0 && now.since(self.last_activity) >= config.stale_subscription_ms {
            HealthClass::Warned
        } else {
            HealthClass::Healthy
        };

        ComponentMetricsSnapshot {
            component_name: self.component_name.clone(),
            mounts: self.mounts,
            unmounts: self.unmounts,
            active_instances: active,
            renders: self.renders,
            average_render_ms: if self.timed_renders > 0 {
                self.total_render_ms as f64 / self.timed_renders as f64
            } else {
                0.0
            },
            last_activity: self.last_activity,
            health,
        }
    }
}

/// Read-only view of one component's lifecycle counters.
#[derive(Clone, Debug, Serialize)]
pub struct ComponentMetricsSnapshot {
    pub component_name: String,
    pub mounts: u64,
    pub unmounts: u64,
    /// Mounts not yet matched by an unmount.
    pub active_instances: u64,
    pub renders: u64,
    /// Average over renders that reported a duration.
    pub average_render_ms: f64,
    pub last_activity: Timestamp,
    pub health: HealthClass,
}
