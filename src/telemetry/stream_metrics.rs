//! Per-stream performance counters.

use crate::types::Timestamp;
use serde::Serialize;

/// Below this first-emission latency a response counts as fast.
const FAST_RESPONSE_MS: u64 = 100;
/// Below this first-emission latency a response counts as medium.
const MEDIUM_RESPONSE_MS: u64 = 500;

/// Kinds of stream activity telemetry understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamActivityKind {
    /// A stream connected upstream; `duration_ms` is the time to its first emission.
    Subscription { duration_ms: Option<u64> },
    CacheHit,
    CacheMiss,
    Error,
}

pub(super) struct StreamMetrics {
    stream_name: String,
    subscription_count: u64,
    cache_hits: u64,
    cache_misses: u64,
    errors: u64,
    total_load_ms: u64,
    timed_loads: u64,
    fast: u64,
    medium: u64,
    slow: u64,
    last_activity: Timestamp,
}

impl StreamMetrics {
    pub(super) fn new(stream_name: &str, now: Timestamp) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            subscription_count: 0,
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
            total_load_ms: 0,
            timed_loads: 0,
            fast: 0,
            medium: 0,
            slow: 0,
            last_activity: now,
        }
    }

    pub(super) fn record(&mut self, kind: StreamActivityKind, now: Timestamp) {
        self.last_activity = now;
        match kind {
            StreamActivityKind::Subscription { duration_ms } => {
                self.subscription_count += 1;
                if let Some(ms) = duration_ms {
                    self.total_load_ms += ms;
                    self.timed_loads += 1;
                    if ms < FAST_RESPONSE_MS {
                        self.fast += 1;
                    } else if ms < MEDIUM_RESPONSE_MS {
                        self.medium += 1;
                    } else {
                        self.slow += 1;
                    }
                }
            }
            StreamActivityKind::CacheHit => self.cache_hits += 1,
            StreamActivityKind::CacheMiss => self.cache_misses += 1,
            StreamActivityKind::Error => self.errors += 1,
        }
    }

    pub(super) fn last_activity(&self) -> Timestamp {
        self.last_activity
    }

    pub(super) fn snapshot(&self) -> StreamMetricsSnapshot {
        StreamMetricsSnapshot {
            stream_name: self.stream_name.clone(),
            subscription_count: self.subscription_count,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            errors: self.errors,
            total_load_ms: self.total_load_ms,
            timed_loads: self.timed_loads,
            average_load_ms: if self.timed_loads > 0 {
                self.total_load_ms as f64 / self.timed_loads as f64
            } else {
                0.0
            },
            fast_responses: self.fast,
            medium_responses: self.medium,
            slow_responses: self.slow,
            last_activity: self.last_activity,
        }
    }
}

/// Read-only view of one stream's counters.
#[derive(Clone, Debug, Serialize)]
pub struct StreamMetricsSnapshot {
    pub stream_name: String,
    pub subscription_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub total_load_ms: u64,
    pub timed_loads: u64,
    pub average_load_ms: f64,
    pub fast_responses: u64,
    pub medium_responses: u64,
    pub slow_responses: u64,
    pub last_activity: Timestamp,
}
