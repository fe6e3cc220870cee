//! Activity bookkeeping for named streams.

use crate::types::{StreamMode, SurfaceKind, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Live counters owned by one stream instance.
///
/// The factory's trackers only hold weak references, so an instance that
/// nobody holds any more reports zero consumers.
pub struct StreamActivity {
    last_access: AtomicU64,
    consumers: AtomicUsize,
}

impl StreamActivity {
    pub(crate) fn new(now: Timestamp) -> Self {
        Self {
            last_access: AtomicU64::new(now.0),
            consumers: AtomicUsize::new(0),
        }
    }

    pub(crate) fn touch(&self, now: Timestamp) {
        self.last_access.fetch_max(now.0, Ordering::SeqCst);
    }

    pub(crate) fn consumer_added(&self, now: Timestamp) {
        self.touch(now);
        self.consumers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn consumer_removed(&self, now: Timestamp) {
        self.touch(now);
        let _ = self
            .consumers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn last_access(&self) -> Timestamp {
        Timestamp(self.last_access.load(Ordering::SeqCst))
    }

    pub fn consumers(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }
}

/// Factory-side record of one stream name.
pub(crate) struct StreamTracker {
    name: String,
    mode: StreamMode,
    surface: SurfaceKind,
    created_at: Timestamp,
    last_activity: Timestamp,
    hit_count: u64,
    instances: Vec<Weak<StreamActivity>>,
}

impl StreamTracker {
    pub(crate) fn new(
        name: &str,
        mode: StreamMode,
        surface: SurfaceKind,
        now: Timestamp,
        instance: &Arc<StreamActivity>,
    ) -> Self {
        Self {
            name: name.to_string(),
            mode,
            surface,
            created_at: now,
            last_activity: now,
            hit_count: 0,
            instances: vec![Arc::downgrade(instance)],
        }
    }

    /// Renewed access to the same name.
    pub(crate) fn renew(&mut self, now: Timestamp, instance: Option<&Arc<StreamActivity>>) {
        self.hit_count += 1;
        self.last_activity = self.last_activity.max(now);
        self.instances.retain(|w| w.strong_count() > 0);
        if let Some(instance) = instance {
            self.instances.push(Arc::downgrade(instance));
        }
    }

    pub(crate) fn touch(&mut self, now: Timestamp) {
        self.last_activity = self.last_activity.max(now);
    }

    pub(crate) fn set_hit_count(&mut self, hits: u64) {
        self.hit_count = hits;
    }

    pub(crate) fn live_consumers(&self) -> usize {
        self.instances
            .iter()
            .filter_map(Weak::upgrade)
            .map(|a| a.consumers())
            .sum()
    }

    /// Latest of factory access and consumer activity.
    pub(crate) fn last_activity(&self) -> Timestamp {
        self.instances
            .iter()
            .filter_map(Weak::upgrade)
            .map(|a| a.last_access())
            .fold(self.last_activity, Timestamp::max)
    }

    pub(crate) fn snapshot(&self, now: Timestamp) -> TrackerSnapshot {
        let last_activity = self.last_activity();
        TrackerSnapshot {
            name: self.name.clone(),
            mode: self.mode,
            surface: self.surface,
            created_at: self.created_at,
            last_activity,
            age_ms: now.since(self.created_at),
            inactive_ms: now.since(last_activity),
            hit_count: self.hit_count,
            live_consumers: self.live_consumers(),
            live_instances: self.instances.iter().filter(|w| w.strong_count() > 0).count(),
        }
    }
}

/// Read-only view of one tracked stream.
#[derive(Clone, Debug, Serialize)]
pub struct TrackerSnapshot {
    pub name: String,
    pub mode: StreamMode,
    pub surface: SurfaceKind,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub age_ms: u64,
    pub inactive_ms: u64,
    pub hit_count: u64,
    /// Consumers currently subscribed across every live instance.
    pub live_consumers: usize,
    pub live_instances: usize,
}

impl TrackerSnapshot {
    pub fn age_minutes(&self) -> u64 {
        self.age_ms / 60_000
    }

    pub fn inactive_minutes(&self) -> u64 {
        self.inactive_ms / 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_follows_live_instances() {
        let first = Arc::new(StreamActivity::new(Timestamp(0)));
        let mut tracker = StreamTracker::new(
            "kpis",
            StreamMode::Component,
            SurfaceKind::Component,
            Timestamp(0),
            &first,
        );
        first.consumer_added(Timestamp(50));
        assert_eq!(tracker.live_consumers(), 1);
        assert_eq!(tracker.last_activity(), Timestamp(50));

        let second = Arc::new(StreamActivity::new(Timestamp(100)));
        tracker.renew(Timestamp(100), Some(&second));
        second.consumer_added(Timestamp(120));
        assert_eq!(tracker.live_consumers(), 2);

        drop(first);
        let snap = tracker.snapshot(Timestamp(60_120));
        assert_eq!(snap.live_consumers, 1);
        assert_eq!(snap.live_instances, 1);
        assert_eq!(snap.hit_count, 1);
        assert_eq!(snap.inactive_minutes(), 1);
    }

    #[test]
    fn test_consumer_count_never_underflows() {
        let activity = StreamActivity::new(Timestamp(0));
        activity.consumer_removed(Timestamp(1));
        assert_eq!(activity.consumers(), 0);
    }
}
