//! Reclamation thresholds and surface liveness.

use crate::stream::TrackerSnapshot;
use crate::types::{SurfaceKind, DEFAULT_GLOBAL_IDENTIFIERS};
use serde::{Deserialize, Serialize};

/// Tier thresholds, from most to least aggressive.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimPolicy {
    /// Modal streams inactive this long are reclaimed unless their surface is live.
    /// Default: 2 minutes
    pub modal_inactive_ms: u64,
    /// Default: 5 minutes
    pub screen_age_ms: u64,
    /// Default: 3 minutes
    pub screen_inactive_ms: u64,
    /// Default: 7 minutes
    pub component_age_ms: u64,
    /// Default: 4 minutes
    pub component_inactive_ms: u64,
    /// Default: 15 minutes
    pub global_age_ms: u64,
    /// Default: 10 minutes
    pub global_inactive_ms: u64,

    /// Inactivity before a stream is examined as a possible orphan.
    /// Default: 1 minute
    pub orphan_inactive_ms: u64,
    /// Default: 30 seconds
    pub modal_orphan_inactive_ms: u64,
    /// Streams older than this are dropped by `sweep_old`.
    /// Default: 10 minutes
    pub old_stream_age_ms: u64,
    /// Modal inactivity threshold of the emergency sweep.
    /// Default: 10 seconds
    pub emergency_modal_inactive_ms: u64,

    /// Interval of the periodic sweep.
    /// Default: 3 minutes
    pub sweep_interval_ms: u64,

    /// Names containing any of these survive navigation.
    pub global_identifiers: Vec<String>,

    /// Health monitor thresholds.
    pub health_modal_critical_inactive_ms: u64,
    pub health_screen_warn_age_ms: u64,
    pub health_global_warn_age_ms: u64,
    pub health_component_warn_age_ms: u64,
}

impl Default for ReclaimPolicy {
    fn default() -> Self {
        Self {
            modal_inactive_ms: 2 * 60_000,
            screen_age_ms: 5 * 60_000,
            screen_inactive_ms: 3 * 60_000,
            component_age_ms: 7 * 60_000,
            component_inactive_ms: 4 * 60_000,
            global_age_ms: 15 * 60_000,
            global_inactive_ms: 10 * 60_000,
            orphan_inactive_ms: 60_000,
            modal_orphan_inactive_ms: 30_000,
            old_stream_age_ms: 10 * 60_000,
            emergency_modal_inactive_ms: 10_000,
            sweep_interval_ms: 3 * 60_000,
            global_identifiers: DEFAULT_GLOBAL_IDENTIFIERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            health_modal_critical_inactive_ms: 3 * 60_000,
            health_screen_warn_age_ms: 7 * 60_000,
            health_global_warn_age_ms: 20 * 60_000,
            health_component_warn_age_ms: 10 * 60_000,
        }
    }
}

/// Reclamation tier of a tracked stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Modal,
    Screen,
    Global,
    Component,
}

impl ReclaimPolicy {
    pub fn is_global(&self, stream: &str) -> bool {
        let name = stream.to_lowercase();
        self.global_identifiers
            .iter()
            .any(|id| name.contains(&id.to_lowercase()))
    }

    pub fn tier(&self, tracker: &TrackerSnapshot) -> Tier {
        match tracker.surface {
            SurfaceKind::Modal => Tier::Modal,
            _ if self.is_global(&tracker.name) => Tier::Global,
            SurfaceKind::Global => Tier::Global,
            SurfaceKind::Screen => Tier::Screen,
            SurfaceKind::Form | SurfaceKind::Component => Tier::Component,
        }
    }
}

/// Whether the navigation path identifies the screen behind `stream`.
pub fn path_matches(path: &str, stream: &str) -> bool {
    let path = path.to_lowercase();
    let stream = stream.to_lowercase();
    if path.contains(&stream) {
        return true;
    }
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .is_some_and(|segment| stream.contains(segment))
}

/// Answers whether the UI surface behind a stream is still mounted.
///
/// Hosts plug in whatever signal their UI layer offers. Reclamation only
/// removes a candidate the probe does not report as live.
pub trait SurfaceProbe: Send + Sync {
    fn is_live(&self, stream: &str, surface: SurfaceKind) -> bool;
}

/// Probe that knows nothing; thresholds alone decide.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProbe;

impl SurfaceProbe for NoProbe {
    fn is_live(&self, _stream: &str, _surface: SurfaceKind) -> bool {
        false
    }
}

impl<F> SurfaceProbe for F
where
    F: Fn(&str, SurfaceKind) -> bool + Send + Sync,
{
    fn is_live(&self, stream: &str, surface: SurfaceKind) -> bool {
        self(stream, surface)
    }
}
