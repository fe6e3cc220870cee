//! Stream factory: builds, tracks and caches derived streams.

use super::cache::{CacheEntry, CacheEntrySnapshot, Lookup, StreamCache};
use super::config::{FactoryConfig, StreamConfig};
use super::derived::{DerivedStream, Pipeline, StreamCore};
use super::tracker::{StreamTracker, TrackerSnapshot};
use crate::scheduler::Scheduler;
use crate::telemetry::{StreamActivityKind, Telemetry};
use crate::types::{SlotValue, StreamMode, SurfaceKind, ViewModel};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of asking the factory to reclaim one tracked stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// Tracker and cache entry removed.
    Reclaimed,
    /// Left alone: consumers are still attached.
    InUse,
    /// No tracker under that name.
    Unknown,
}

/// Aggregate counts over every tracked stream.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StreamSummary {
    pub component_streams: usize,
    pub data_streams: usize,
    pub cached_entries: usize,
    pub cache_size_bytes: usize,
    pub live_consumers: usize,
}

/// Diagnostic view of the factory's bookkeeping.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StreamStats {
    pub component: Vec<TrackerSnapshot>,
    pub data: Vec<TrackerSnapshot>,
    pub cache: Vec<CacheEntrySnapshot>,
    pub summary: StreamSummary,
}

/// Central policy engine for derived streams.
///
/// The factory exclusively owns the tracker maps and the data-mode cache.
/// Other components read them through snapshots and change them only via
/// [`reclaim`](Self::reclaim), [`surface_disposed`](Self::surface_disposed)
/// and the cache operations.
pub struct StreamFactory {
    config: FactoryConfig,
    telemetry: Arc<Telemetry>,
    scheduler: Arc<dyn Scheduler>,
    component_streams: RwLock<HashMap<String, StreamTracker>>,
    data_streams: RwLock<HashMap<String, StreamTracker>>,
    cache: Mutex<StreamCache>,
}

impl StreamFactory {
    pub fn new(config: FactoryConfig, telemetry: Arc<Telemetry>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            config,
            telemetry,
            scheduler,
            component_streams: RwLock::new(HashMap::new()),
            data_streams: RwLock::new(HashMap::new()),
            cache: Mutex::new(StreamCache::new()),
        }
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Build an always-live, uncached, reference-counted stream.
    ///
    /// Nothing connects until the first consumer subscribes; loaders run on
    /// every activation. `cache_ms` is ignored.
    pub fn create_ui_stream<I, T>(&self, config: StreamConfig<I, T>) -> DerivedStream<T>
    where
        I: SlotValue,
        T: ViewModel,
    {
        let now = self.scheduler.now();
        let name = config.name.clone();
        let surface = config.resolved_surface();
        let debounce_ms = config.resolved_debounce_ms(&self.config);

        let core = StreamCore::new(
            Pipeline::from_config(config, StreamMode::Component, debounce_ms),
            Arc::clone(&self.telemetry),
            Arc::clone(&self.scheduler),
        );
        let stream = DerivedStream::from_core(core);
        let activity = stream.activity();

        self.component_streams
            .write()
            .entry(name.clone())
            .and_modify(|t| t.renew(now, Some(&activity)))
            .or_insert_with(|| {
                StreamTracker::new(&name, StreamMode::Component, surface, now, &activity)
            });

        debug!(stream = %name, surface = ?surface, debounce_ms, "ui stream created");
        stream
    }

    /// Build or reuse a cached stream kept alive independent of consumers.
    ///
    /// Within the cache window the same instance is returned and its hit
    /// count grows; afterwards a new instance is built and connected.
    pub fn create_data_stream<I, T>(&self, config: StreamConfig<I, T>) -> DerivedStream<T>
    where
        I: SlotValue,
        T: ViewModel,
    {
        let now = self.scheduler.now();
        let name = config.name.clone();
        let cache_ms = config.resolved_cache_ms(&self.config);

        let lookup = self.cache.lock().lookup::<T>(&name, now, cache_ms);
        let stale = match lookup {
            Lookup::Hit { stream, hits } => {
                self.record_data_hit(&name, &stream, hits);
                self.telemetry.record_stream(&name, StreamActivityKind::CacheHit);
                debug!(stream = %name, hits, "data stream cache hit");
                return stream;
            }
            Lookup::Miss { stale } => stale,
        };
        drop(stale);
        self.telemetry.record_stream(&name, StreamActivityKind::CacheMiss);

        let surface = config.resolved_surface();
        let debounce_ms = config.resolved_debounce_ms(&self.config);
        let max_entries = config.resolved_max_cache_size(&self.config);
        let estimated_size = config.sources.len() * self.config.estimated_bytes_per_source;

        let core = StreamCore::new(
            Pipeline::from_config(config, StreamMode::Data, debounce_ms),
            Arc::clone(&self.telemetry),
            Arc::clone(&self.scheduler),
        );
        core.connect();
        let stream = DerivedStream::from_core(core);
        let activity = stream.activity();

        self.data_streams.write().insert(
            name.clone(),
            StreamTracker::new(&name, StreamMode::Data, surface, now, &activity),
        );

        let (replaced, evicted) = {
            let mut cache = self.cache.lock();
            let replaced = cache.insert(&name, stream.clone(), now, estimated_size);
            (replaced, cache.evict_to(max_entries))
        };
        drop(replaced);
        self.release_entries(evicted, "lru");

        debug!(stream = %name, cache_ms, "data stream created");
        stream
    }

    fn record_data_hit<T: ViewModel>(&self, name: &str, stream: &DerivedStream<T>, hits: u64) {
        let now = self.scheduler.now();
        let mut trackers = self.data_streams.write();
        let tracker = trackers.entry(name.to_string()).or_insert_with(|| {
            let activity = stream.activity();
            StreamTracker::new(name, StreamMode::Data, SurfaceKind::infer(name), now, &activity)
        });
        tracker.touch(now);
        tracker.set_hit_count(hits);
    }

    /// Drop cache entries, outside the cache lock.
    ///
    /// Data trackers of evicted names go too, unless someone is still subscribed.
    fn release_entries(&self, entries: Vec<(String, CacheEntry)>, reason: &str) {
        for (name, entry) in entries {
            debug!(stream = %name, reason, "cache entry evicted");
            drop(entry);
            let mut trackers = self.data_streams.write();
            if trackers.get(&name).is_some_and(|t| t.live_consumers() == 0) {
                trackers.remove(&name);
            }
        }
    }

    /// Forget one stream (or every stream when `name` is `None`).
    ///
    /// Returns the number of trackers removed. Live handles keep working;
    /// the next data-mode request for a cleared name builds a new instance.
    pub fn clear_stream_cache(&self, name: Option<&str>) -> usize {
        match name {
            Some(name) => {
                let removed = self.component_streams.write().remove(name).is_some() as usize
                    + self.data_streams.write().remove(name).is_some() as usize;
                let entry = self.cache.lock().remove(name);
                drop(entry);
                debug!(stream = %name, removed, "stream cache cleared");
                removed
            }
            None => {
                let removed = {
                    let mut component = self.component_streams.write();
                    let mut data = self.data_streams.write();
                    let n = component.len() + data.len();
                    component.clear();
                    data.clear();
                    n
                };
                let entries = self.cache.lock().drain();
                self.release_entries(entries, "clear");
                info!(removed, "all stream caches cleared");
                removed
            }
        }
    }

    /// Evict cached streams idle beyond `cache_idle_eviction_ms`.
    pub fn maintain_cache(&self) -> usize {
        let now = self.scheduler.now();
        let evicted = self
            .cache
            .lock()
            .evict_idle(now, self.config.cache_idle_eviction_ms);
        let count = evicted.len();
        self.release_entries(evicted, "idle");
        if count > 0 {
            info!(evicted = count, "cache maintenance");
        }
        count
    }

    /// Explicit signal that the UI surface behind `name` is gone.
    ///
    /// Returns true if bookkeeping was removed.
    pub fn surface_disposed(&self, name: &str) -> bool {
        let outcomes = [
            self.reclaim(name, StreamMode::Component),
            self.reclaim(name, StreamMode::Data),
        ];
        if outcomes.contains(&ReclaimOutcome::InUse) {
            warn!(stream = %name, "surface disposed while consumers are attached");
        }
        outcomes.contains(&ReclaimOutcome::Reclaimed)
    }

    /// Remove the tracker (and cache entry) for `name` unless it has live consumers.
    pub fn reclaim(&self, name: &str, mode: StreamMode) -> ReclaimOutcome {
        let trackers = match mode {
            StreamMode::Component => &self.component_streams,
            StreamMode::Data => &self.data_streams,
        };
        {
            let mut trackers = trackers.write();
            match trackers.get(name) {
                None => return ReclaimOutcome::Unknown,
                Some(t) if t.live_consumers() > 0 => return ReclaimOutcome::InUse,
                Some(_) => {
                    trackers.remove(name);
                }
            }
        }
        if mode == StreamMode::Data {
            let entry = self.cache.lock().remove(name);
            drop(entry);
        }
        debug!(stream = %name, mode = ?mode, "stream reclaimed");
        ReclaimOutcome::Reclaimed
    }

    /// Snapshots of every tracker of one mode, sorted by name.
    pub fn trackers(&self, mode: StreamMode) -> Vec<TrackerSnapshot> {
        let now = self.scheduler.now();
        let trackers = match mode {
            StreamMode::Component => self.component_streams.read(),
            StreamMode::Data => self.data_streams.read(),
        };
        let mut out: Vec<TrackerSnapshot> = trackers.values().map(|t| t.snapshot(now)).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn tracker(&self, name: &str, mode: StreamMode) -> Option<TrackerSnapshot> {
        let now = self.scheduler.now();
        let trackers = match mode {
            StreamMode::Component => self.component_streams.read(),
            StreamMode::Data => self.data_streams.read(),
        };
        trackers.get(name).map(|t| t.snapshot(now))
    }

    pub fn stream_stats(&self) -> StreamStats {
        let component = self.trackers(StreamMode::Component);
        let data = self.trackers(StreamMode::Data);
        let (cache, cache_size_bytes) = {
            let cache = self.cache.lock();
            (cache.snapshot(self.scheduler.now()), cache.total_size())
        };
        let summary = StreamSummary {
            component_streams: component.len(),
            data_streams: data.len(),
            cached_entries: cache.len(),
            cache_size_bytes,
            live_consumers: component
                .iter()
                .chain(data.iter())
                .map(|t| t.live_consumers)
                .sum(),
        };
        StreamStats {
            component,
            data,
            cache,
            summary,
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}
