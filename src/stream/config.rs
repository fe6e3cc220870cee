//! Factory and per-stream configuration.

use crate::error::StreamError;
use crate::source::Source;
use crate::types::{FallbackContext, SurfaceKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Side-effecting trigger that kicks off the fetches feeding a stream's sources.
pub type Loader = Arc<dyn Fn() -> Result<(), StreamError> + Send + Sync>;

/// Maps the latest value of every source, in source order, to a view model.
pub type Combiner<I, T> = Arc<dyn Fn(&[I]) -> Result<T, StreamError> + Send + Sync>;

/// Side channel notified of every contained failure.
pub type ErrorHook = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Runs when a stream releases its upstream bindings.
pub type CleanupHook = Arc<dyn Fn() + Send + Sync>;

/// Per-stream override of [`ViewModel::fallback`](crate::types::ViewModel::fallback).
pub type FallbackFn<T> = Arc<dyn Fn(&FallbackContext<'_>) -> T + Send + Sync>;

/// Factory-wide defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Debounce applied when a stream does not ask for one.
    /// Default: 0
    pub default_debounce_ms: u64,

    /// Data-mode cache duration when nothing more specific applies.
    /// Default: 2 minutes
    pub default_cache_ms: u64,

    /// Data-mode cache duration for critical-path streams.
    /// Default: 1 minute
    pub critical_cache_ms: u64,

    /// Data-mode cache duration for streams flagged as UI components.
    /// Default: 30 seconds
    pub ui_cache_ms: u64,

    /// Maximum cached data-mode streams before LRU eviction.
    /// Default: 10
    pub max_cache_entries: usize,

    /// Cached streams idle longer than this are evicted by maintenance.
    /// Default: 10 minutes
    pub cache_idle_eviction_ms: u64,

    /// Interval between cache maintenance passes.
    /// Default: 2 minutes
    pub maintenance_interval_ms: u64,

    /// Size estimate charged per source of a cached stream.
    /// Default: 1024
    pub estimated_bytes_per_source: usize,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            default_debounce_ms: 0,
            default_cache_ms: 120_000,
            critical_cache_ms: 60_000,
            ui_cache_ms: 30_000,
            max_cache_entries: 10,
            cache_idle_eviction_ms: 10 * 60 * 1000,
            maintenance_interval_ms: 2 * 60 * 1000,
            estimated_bytes_per_source: 1024,
        }
    }
}

/// Description of one derived stream.
///
/// `I` is the value type every source emits and `T` the view model the
/// combiner produces. Source order is significant: the combiner receives
/// one slot per source, in the order the sources were added.
pub struct StreamConfig<I, T> {
    pub name: String,
    pub loaders: Vec<Loader>,
    pub sources: Vec<Arc<dyn Source<I>>>,
    pub combiner: Combiner<I, T>,
    /// Data mode only; ignored by UI-mode streams.
    pub cache_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub max_cache_size: Option<usize>,
    /// Inferred from the name when unset.
    pub surface: Option<SurfaceKind>,
    pub is_ui_component: bool,
    pub is_critical_path: bool,
    pub on_error: Option<ErrorHook>,
    pub on_cleanup: Option<CleanupHook>,
    pub fallback: Option<FallbackFn<T>>,
}

impl<I, T> StreamConfig<I, T> {
    pub fn new<F>(name: impl Into<String>, combiner: F) -> Self
    where
        F: Fn(&[I]) -> Result<T, StreamError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            loaders: Vec::new(),
            sources: Vec::new(),
            combiner: Arc::new(combiner),
            cache_ms: None,
            debounce_ms: None,
            max_cache_size: None,
            surface: None,
            is_ui_component: false,
            is_critical_path: false,
            on_error: None,
            on_cleanup: None,
            fallback: None,
        }
    }

    /// Long-lived preset: 3 minute cache, 50ms debounce, up to 15 cached streams.
    pub fn basic<F>(name: impl Into<String>, combiner: F) -> Self
    where
        F: Fn(&[I]) -> Result<T, StreamError> + Send + Sync + 'static,
    {
        Self::new(name, combiner)
            .cache_ms(180_000)
            .debounce_ms(50)
            .max_cache_size(15)
    }

    /// Preset for data the dashboard cannot render without.
    pub fn critical<F>(name: impl Into<String>, combiner: F) -> Self
    where
        F: Fn(&[I]) -> Result<T, StreamError> + Send + Sync + 'static,
    {
        Self::new(name, combiner).critical_path(true)
    }

    pub fn source<S>(mut self, source: S) -> Self
    where
        S: Source<I> + 'static,
    {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn loader<F>(mut self, loader: F) -> Self
    where
        F: Fn() -> Result<(), StreamError> + Send + Sync + 'static,
    {
        self.loaders.push(Arc::new(loader));
        self
    }

    pub fn cache_ms(mut self, ms: u64) -> Self {
        self.cache_ms = Some(ms);
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = Some(ms);
        self
    }

    pub fn max_cache_size(mut self, entries: usize) -> Self {
        self.max_cache_size = Some(entries);
        self
    }

    pub fn surface(mut self, surface: SurfaceKind) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn ui_component(mut self, flag: bool) -> Self {
        self.is_ui_component = flag;
        self
    }

    pub fn critical_path(mut self, flag: bool) -> Self {
        self.is_critical_path = flag;
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn on_cleanup<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_cleanup = Some(Arc::new(hook));
        self
    }

    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(&FallbackContext<'_>) -> T + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Declared surface, or the one inferred from the name.
    pub fn resolved_surface(&self) -> SurfaceKind {
        self.surface.unwrap_or_else(|| SurfaceKind::infer(&self.name))
    }

    /// Effective debounce: always zero for input surfaces.
    pub fn resolved_debounce_ms(&self, defaults: &FactoryConfig) -> u64 {
        if self.resolved_surface().is_input_surface() {
            0
        } else {
            self.debounce_ms.unwrap_or(defaults.default_debounce_ms)
        }
    }

    /// Effective data-mode cache duration.
    pub fn resolved_cache_ms(&self, defaults: &FactoryConfig) -> u64 {
        self.cache_ms.unwrap_or(if self.is_ui_component {
            defaults.ui_cache_ms
        } else if self.is_critical_path {
            defaults.critical_cache_ms
        } else {
            defaults.default_cache_ms
        })
    }

    pub fn resolved_max_cache_size(&self, defaults: &FactoryConfig) -> usize {
        self.max_cache_size.unwrap_or(defaults.max_cache_entries).max(1)
    }
}
