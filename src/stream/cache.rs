//! Time-boxed LRU cache of data-mode streams.

use super::derived::DerivedStream;
use crate::types::{Timestamp, ViewModel};
use lru::LruCache;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;

/// One cached stream instance.
pub(crate) struct CacheEntry {
    /// A `DerivedStream<T>`, erased so streams of any view model share one cache.
    stream: Arc<dyn Any + Send + Sync>,
    timestamp: Timestamp,
    hit_count: u64,
    last_access: Timestamp,
    estimated_size_bytes: usize,
}

impl CacheEntry {
    fn is_fresh(&self, now: Timestamp, cache_ms: u64) -> bool {
        now.since(self.timestamp) < cache_ms
    }
}

/// Outcome of a cache lookup.
pub(crate) enum Lookup<T> {
    Hit { stream: DerivedStream<T>, hits: u64 },
    /// Nothing usable; any expired or mismatched entry has been taken out.
    Miss { stale: Option<CacheEntry> },
}

/// Read-only view of one cache entry.
#[derive(Clone, Debug, Serialize)]
pub struct CacheEntrySnapshot {
    pub name: String,
    pub created_at: Timestamp,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub hit_count: u64,
    pub estimated_size_bytes: usize,
}

pub(crate) struct StreamCache {
    entries: LruCache<String, CacheEntry>,
}

impl StreamCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
        }
    }

    /// Look `name` up, counting a hit if the entry is still fresh.
    pub(crate) fn lookup<T: ViewModel>(&mut self, name: &str, now: Timestamp, cache_ms: u64) -> Lookup<T> {
        let usable = match self.entries.get_mut(name) {
            None => return Lookup::Miss { stale: None },
            Some(entry) if entry.is_fresh(now, cache_ms) => entry
                .stream
                .downcast_ref::<DerivedStream<T>>()
                .cloned()
                .map(|stream| {
                    entry.hit_count += 1;
                    entry.last_access = now;
                    (stream, entry.hit_count)
                }),
            Some(_) => None,
        };

        match usable {
            Some((stream, hits)) => Lookup::Hit { stream, hits },
            None => Lookup::Miss {
                stale: self.entries.pop(name),
            },
        }
    }

    /// Insert a freshly built stream, returning any entry it replaced.
    pub(crate) fn insert<T: ViewModel>(
        &mut self,
        name: &str,
        stream: DerivedStream<T>,
        now: Timestamp,
        estimated_size_bytes: usize,
    ) -> Option<CacheEntry> {
        self.entries.put(
            name.to_string(),
            CacheEntry {
                stream: Arc::new(stream),
                timestamp: now,
                hit_count: 0,
                last_access: now,
                estimated_size_bytes,
            },
        )
    }

    /// Drop least recently used entries until at most `max` remain.
    pub(crate) fn evict_to(&mut self, max: usize) -> Vec<(String, CacheEntry)> {
        let mut evicted = Vec::new();
        while self.entries.len() > max {
            match self.entries.pop_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Drop entries not accessed for `idle_ms`.
    pub(crate) fn evict_idle(&mut self, now: Timestamp, idle_ms: u64) -> Vec<(String, CacheEntry)> {
        let idle: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.since(e.last_access) > idle_ms)
            .map(|(k, _)| k.clone())
            .collect();
        idle.into_iter()
            .filter_map(|k| self.entries.pop(&k).map(|e| (k, e)))
            .collect()
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<CacheEntry> {
        self.entries.pop(name)
    }

    pub(crate) fn drain(&mut self) -> Vec<(String, CacheEntry)> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.entries.pop_lru() {
            out.push(entry);
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn total_size(&self) -> usize {
        self.entries.iter().map(|(_, e)| e.estimated_size_bytes).sum()
    }

    /// Entries from most to least recently used.
    pub(crate) fn snapshot(&self, now: Timestamp) -> Vec<CacheEntrySnapshot> {
        self.entries
            .iter()
            .map(|(name, e)| CacheEntrySnapshot {
                name: name.clone(),
                created_at: e.timestamp,
                age_ms: now.since(e.timestamp),
                idle_ms: now.since(e.last_access),
                hit_count: e.hit_count,
                estimated_size_bytes: e.estimated_size_bytes,
            })
            .collect()
    }
}
