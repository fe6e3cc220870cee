//! Point-in-time report over every subsystem.

use crate::error::Result;
use crate::reclaim::HealthReport;
use crate::stream::StreamStats;
use crate::subscriptions::GlobalStoreStats;
use crate::telemetry::TelemetryReport;
use crate::types::Timestamp;
use serde::Serialize;

/// Everything the orchestrator knows, gathered in one pass.
#[derive(Clone, Debug, Serialize)]
pub struct SystemReport {
    pub timestamp: Timestamp,
    pub stores: GlobalStoreStats,
    pub streams: StreamStats,
    pub telemetry: TelemetryReport,
    pub health: HealthReport,
}

impl SystemReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Nothing in the report calls for attention.
    pub fn is_healthy(&self) -> bool {
        self.health.critical.is_empty()
            && self.stores.stores.iter().all(|s| !s.pressure.is_elevated())
    }
}
