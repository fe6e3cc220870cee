//! Orphan reclamation.
//!
//! Reference counting alone cannot tell that a screen was torn down without
//! unsubscribing. The [`Reclaimer`] sweeps the factory's UI-mode trackers
//! with tiered inactivity thresholds, a navigation hook, and a pluggable
//! [`SurfaceProbe`], removing bookkeeping for streams whose surface is
//! gone. A stream with live consumers is never reclaimed; it is reported in
//! [`ReclaimReport::skipped_live`] instead.

mod policy;

pub use policy::{path_matches, NoProbe, ReclaimPolicy, SurfaceProbe, Tier};

use crate::scheduler::{Scheduler, TimerId};
use crate::stream::{ReclaimOutcome, StreamFactory, TrackerSnapshot};
use crate::types::StreamMode;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Names reclaimed by one operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub reclaimed: Vec<String>,
    /// Candidates left alone because consumers were attached.
    pub skipped_live: Vec<String>,
}

impl ReclaimReport {
    pub fn reclaimed_count(&self) -> usize {
        self.reclaimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.skipped_live.is_empty()
    }

    fn merge(&mut self, other: ReclaimReport) {
        self.reclaimed.extend(other.reclaimed);
        for name in other.skipped_live {
            if !self.skipped_live.contains(&name) {
                self.skipped_live.push(name);
            }
        }
    }
}

/// Diagnostic classification of tracked UI streams. Nothing is removed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct HealthReport {
    pub total_streams: usize,
    pub modals: usize,
    pub screens: usize,
    pub globals: usize,
    pub others: usize,
    pub critical: Vec<String>,
    pub warnings: Vec<String>,
}

/// Sweeps tracked streams whose UI surface appears gone.
pub struct Reclaimer {
    policy: ReclaimPolicy,
    factory: Arc<StreamFactory>,
    scheduler: Arc<dyn Scheduler>,
    probe: RwLock<Arc<dyn SurfaceProbe>>,
    current_path: RwLock<Option<String>>,
    sweep_timer: Mutex<Option<TimerId>>,
}

impl Reclaimer {
    pub fn new(policy: ReclaimPolicy, factory: Arc<StreamFactory>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            policy,
            factory,
            scheduler,
            probe: RwLock::new(Arc::new(NoProbe)),
            current_path: RwLock::new(None),
            sweep_timer: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &ReclaimPolicy {
        &self.policy
    }

    /// Replace the surface liveness probe.
    pub fn set_probe(&self, probe: Arc<dyn SurfaceProbe>) {
        *self.probe.write() = probe;
    }

    pub fn current_path(&self) -> Option<String> {
        self.current_path.read().clone()
    }

    fn is_surface_live(&self, tracker: &TrackerSnapshot) -> bool {
        let probe = Arc::clone(&*self.probe.read());
        probe.is_live(&tracker.name, tracker.surface)
    }

    /// Reclaim every UI tracker matching `candidate`.
    fn reclaim_where<F>(&self, candidate: F) -> ReclaimReport
    where
        F: Fn(&TrackerSnapshot) -> bool,
    {
        let mut report = ReclaimReport::default();
        for tracker in self.factory.trackers(StreamMode::Component) {
            if !candidate(&tracker) {
                continue;
            }
            match self.factory.reclaim(&tracker.name, StreamMode::Component) {
                ReclaimOutcome::Reclaimed => report.reclaimed.push(tracker.name),
                ReclaimOutcome::InUse => report.skipped_live.push(tracker.name),
                ReclaimOutcome::Unknown => {}
            }
        }
        report
    }

    /// Tiered sweep with the conservative per-surface thresholds.
    pub fn sweep(&self) -> ReclaimReport {
        let path = self.current_path();
        let p = &self.policy;
        let report = self.reclaim_where(|t| {
            let expired = match p.tier(t) {
                Tier::Modal => t.inactive_ms >= p.modal_inactive_ms,
                Tier::Screen => {
                    t.age_ms >= p.screen_age_ms
                        && t.inactive_ms >= p.screen_inactive_ms
                        && path
                            .as_deref()
                            .is_some_and(|path| !path_matches(path, &t.name))
                }
                Tier::Global => t.age_ms >= p.global_age_ms && t.inactive_ms >= p.global_inactive_ms,
                Tier::Component => {
                    t.age_ms >= p.component_age_ms && t.inactive_ms >= p.component_inactive_ms
                }
            };
            expired && !self.is_surface_live(t)
        });
        log_report("tiered sweep", &report);
        report
    }

    /// Reclaim inactive streams whose surface is neither live nor on the current path.
    pub fn sweep_orphans(&self) -> ReclaimReport {
        let path = self.current_path();
        let p = &self.policy;
        let report = self.reclaim_where(|t| {
            if self.is_surface_live(t) {
                return false;
            }
            match p.tier(t) {
                Tier::Modal => t.inactive_ms >= p.modal_orphan_inactive_ms,
                _ => {
                    let on_screen = p.is_global(&t.name)
                        || path.as_deref().is_some_and(|path| path_matches(path, &t.name));
                    t.inactive_ms >= p.orphan_inactive_ms && !on_screen
                }
            }
        });
        log_report("orphan sweep", &report);
        report
    }

    /// Reclaim streams older than `old_stream_age_ms`.
    pub fn sweep_old(&self) -> ReclaimReport {
        let max_age = self.policy.old_stream_age_ms;
        let report = self.reclaim_where(|t| t.age_ms > max_age);
        log_report("age sweep", &report);
        report
    }

    /// Record a navigation and reclaim what belonged to the screen just left.
    ///
    /// The first recorded path only sets the baseline.
    pub fn on_navigation(&self, path: &str) -> ReclaimReport {
        let previous = self.current_path.write().replace(path.to_string());
        match previous {
            Some(ref prev) if prev != path => {}
            _ => return ReclaimReport::default(),
        }

        debug!(from = ?previous, to = %path, "navigation");
        let p = &self.policy;
        let report = self.reclaim_where(|t| !p.is_global(&t.name) && !path_matches(path, &t.name));
        log_report("navigation sweep", &report);
        report
    }

    /// Every sweep at once, plus a short-fuse modal check.
    pub fn emergency_sweep(&self) -> ReclaimReport {
        let mut report = self.sweep();
        report.merge(self.sweep_orphans());
        report.merge(self.sweep_old());

        let fuse = self.policy.emergency_modal_inactive_ms;
        let p = &self.policy;
        report.merge(self.reclaim_where(|t| {
            p.tier(t) == Tier::Modal && t.inactive_ms >= fuse && !self.is_surface_live(t)
        }));

        info!(
            reclaimed = report.reclaimed.len(),
            skipped_live = report.skipped_live.len(),
            "emergency sweep"
        );
        report
    }

    /// Classify tracked UI streams and flag suspicious ones.
    pub fn monitor_health(&self) -> HealthReport {
        let p = &self.policy;
        let trackers = self.factory.trackers(StreamMode::Component);
        let mut report = HealthReport {
            total_streams: trackers.len(),
            ..Default::default()
        };

        for t in &trackers {
            match p.tier(t) {
                Tier::Modal => {
                    report.modals += 1;
                    if t.inactive_ms >= p.health_modal_critical_inactive_ms {
                        report.critical.push(format!(
                            "{} (modal, inactive {}min)",
                            t.name,
                            t.inactive_minutes()
                        ));
                    }
                }
                Tier::Screen => {
                    report.screens += 1;
                    if t.age_ms >= p.health_screen_warn_age_ms {
                        report
                            .warnings
                            .push(format!("{} (screen, age {}min)", t.name, t.age_minutes()));
                    }
                }
                Tier::Global => {
                    report.globals += 1;
                    if t.age_ms >= p.health_global_warn_age_ms {
                        report
                            .warnings
                            .push(format!("{} (global, age {}min)", t.name, t.age_minutes()));
                    }
                }
                Tier::Component => {
                    report.others += 1;
                    if t.age_ms >= p.health_component_warn_age_ms {
                        report
                            .warnings
                            .push(format!("{} (component, age {}min)", t.name, t.age_minutes()));
                    }
                }
            }
        }
        report
    }

    /// Run [`sweep`](Self::sweep) every `sweep_interval_ms`.
    ///
    /// Returns false if periodic sweeping was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut timer = self.sweep_timer.lock();
        if timer.is_some() {
            return false;
        }
        let weak = Arc::downgrade(self);
        *timer = Some(self.scheduler.schedule_repeating(
            self.policy.sweep_interval_ms,
            Arc::new(move || {
                if let Some(reclaimer) = weak.upgrade() {
                    reclaimer.sweep();
                }
            }),
        ));
        debug!(interval_ms = self.policy.sweep_interval_ms, "periodic reclamation started");
        true
    }

    pub fn stop(&self) -> bool {
        match self.sweep_timer.lock().take() {
            Some(id) => {
                self.scheduler.cancel(id);
                debug!("periodic reclamation stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweep_timer.lock().is_some()
    }
}

fn log_report(operation: &str, report: &ReclaimReport) {
    if !report.reclaimed.is_empty() {
        info!(
            operation,
            reclaimed = report.reclaimed.len(),
            skipped_live = report.skipped_live.len(),
            "streams reclaimed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::scheduler::ManualScheduler;
    use crate::source::Subject;
    use crate::stream::{FactoryConfig, StreamConfig};
    use crate::telemetry::{Telemetry, TelemetryConfig};
    use crate::types::SurfaceKind;
    use serde_json::{json, Value};

    const MINUTE: u64 = 60_000;

    struct Fixture {
        clock: Arc<ManualScheduler>,
        factory: Arc<StreamFactory>,
        reclaimer: Arc<Reclaimer>,
        source: Subject<Value>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualScheduler::new());
            let telemetry = Arc::new(Telemetry::new(TelemetryConfig::default(), clock.clone()));
            let factory = Arc::new(StreamFactory::new(
                FactoryConfig::default(),
                telemetry,
                clock.clone(),
            ));
            let reclaimer = Arc::new(Reclaimer::new(
                ReclaimPolicy::default(),
                factory.clone(),
                clock.clone(),
            ));
            Self {
                clock,
                factory,
                reclaimer,
                source: Subject::with_value(json!(1)),
            }
        }

        fn ui(&self, name: &str) {
            self.factory.create_ui_stream(
                StreamConfig::new(name, |v: &[Value]| -> Result<Value, StreamError> { Ok(v[0].clone()) })
                    .source(self.source.clone()),
            );
        }

        fn tracked(&self) -> Vec<String> {
            self.factory
                .trackers(StreamMode::Component)
                .into_iter()
                .map(|t| t.name)
                .collect()
        }
    }

    #[test]
    fn test_tiered_sweep_thresholds() {
        let f = Fixture::new();
        f.ui("NpsModal");
        f.ui("kpiSection");
        f.ui("AuthSession");

        f.clock.advance(2 * MINUTE);
        assert_eq!(f.reclaimer.sweep().reclaimed, vec!["NpsModal"]);

        f.clock.advance(5 * MINUTE);
        assert_eq!(f.reclaimer.sweep().reclaimed, vec!["kpiSection"]);

        f.clock.advance(8 * MINUTE);
        assert_eq!(f.reclaimer.sweep().reclaimed, vec!["AuthSession"]);
        assert!(f.tracked().is_empty());
    }

    #[test]
    fn test_screen_tier_needs_known_path() {
        let f = Fixture::new();
        f.ui("storesPage");
        f.clock.advance(6 * MINUTE);
        assert!(f.reclaimer.sweep().reclaimed.is_empty());

        f.reclaimer.on_navigation("/storespage");
        assert!(f.reclaimer.sweep().reclaimed.is_empty());

        *f.reclaimer.current_path.write() = Some("/contracts".into());
        assert_eq!(f.reclaimer.sweep().reclaimed, vec!["storesPage"]);
    }

    #[test]
    fn test_live_consumers_are_skipped() {
        let f = Fixture::new();
        let stream = f.factory.create_ui_stream(
            StreamConfig::new("NpsModal", |v: &[Value]| -> Result<Value, StreamError> { Ok(v[0].clone()) })
                .source(f.source.clone()),
        );
        let _sub = stream.subscribe(|_| {});
        f.clock.advance(30 * MINUTE);

        let report = f.reclaimer.emergency_sweep();
        assert!(report.reclaimed.is_empty());
        assert_eq!(report.skipped_live, vec!["NpsModal"]);
        assert_eq!(f.tracked(), vec!["NpsModal"]);
    }

    #[test]
    fn test_probe_keeps_mounted_surfaces() {
        let f = Fixture::new();
        f.ui("NpsModal");
        f.reclaimer
            .set_probe(Arc::new(|name: &str, _surface: SurfaceKind| name == "NpsModal"));
        f.clock.advance(5 * MINUTE);
        assert!(f.reclaimer.sweep().is_empty());
        assert!(f.reclaimer.sweep_orphans().is_empty());
    }

    #[test]
    fn test_orphans_and_old_streams() {
        let f = Fixture::new();
        f.ui("NpsModal");
        f.ui("kpiSection");
        f.ui("notificationBell");

        f.clock.advance(40_000);
        assert_eq!(f.reclaimer.sweep_orphans().reclaimed, vec!["NpsModal"]);

        f.clock.advance(30_000);
        assert_eq!(f.reclaimer.sweep_orphans().reclaimed, vec!["kpiSection"]);

        f.clock.advance(10 * MINUTE);
        assert_eq!(f.reclaimer.sweep_old().reclaimed, vec!["notificationBell"]);
    }

    #[test]
    fn test_navigation_reclaims_previous_screen() {
        let f = Fixture::new();
        assert!(f.reclaimer.on_navigation("/stores").is_empty());
        f.ui("storesTable");
        f.ui("routerOutlet");
        f.ui("contractsTable");

        assert!(f.reclaimer.on_navigation("/stores").is_empty());
        let report = f.reclaimer.on_navigation("/contracts");
        assert_eq!(report.reclaimed, vec!["storesTable"]);
        assert_eq!(f.tracked(), vec!["contractsTable", "routerOutlet"]);
        assert_eq!(f.reclaimer.current_path().as_deref(), Some("/contracts"));
    }

    #[test]
    fn test_emergency_modal_fuse() {
        let f = Fixture::new();
        f.ui("NpsModal");
        f.ui("kpiSection");
        f.clock.advance(10_000);
        assert_eq!(f.reclaimer.emergency_sweep().reclaimed, vec!["NpsModal"]);
        assert_eq!(f.tracked(), vec!["kpiSection"]);
    }

    #[test]
    fn test_health_monitor() {
        let f = Fixture::new();
        f.ui("NpsModal");
        f.ui("storesPage");
        f.ui("headerBar");
        f.ui("kpiSection");
        f.clock.advance(11 * MINUTE);

        let health = f.reclaimer.monitor_health();
        assert_eq!(health.total_streams, 4);
        assert_eq!((health.modals, health.screens, health.globals, health.others), (1, 1, 1, 1));
        assert_eq!(health.critical, vec!["NpsModal (modal, inactive 11min)"]);
        assert_eq!(health.warnings.len(), 2);
        assert_eq!(f.tracked().len(), 4);
    }

    #[test]
    fn test_periodic_sweep() {
        let f = Fixture::new();
        assert!(f.reclaimer.start());
        assert!(!f.reclaimer.start());
        f.ui("NpsModal");

        f.clock.advance(3 * MINUTE);
        assert!(f.tracked().is_empty());

        assert!(f.reclaimer.stop());
        assert!(!f.reclaimer.is_running());
        assert_eq!(f.clock.pending_count(), 0);
    }
}
