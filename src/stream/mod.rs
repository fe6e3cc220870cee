//! Derived streams and the factory that builds them.
//!
//! A derived stream combines the latest value of every upstream source
//! into one view model per named screen or component. The factory offers
//! two lifecycles:
//!
//! - **UI mode** ([`StreamFactory::create_ui_stream`]): uncached and
//!   reference counted. Upstream bindings exist only while at least one
//!   consumer is subscribed, and loaders re-run on every activation.
//! - **Data mode** ([`StreamFactory::create_data_stream`]): cached by name
//!   for a bounded duration and kept connected regardless of consumers.
//!
//! Failures of sources, loaders and combiners never reach consumers: they
//! are reported through `on_error` and replaced by a fallback value.
//!
//! # Example
//!
//! ```ignore
//! let stream = factory.create_ui_stream(
//!     StreamConfig::new("KpiSection", |v: &[Value]| Ok(json!({ "kpis": v[0] })))
//!         .source(kpis.clone())
//!         .loader(move || { kpi_store.load(); Ok(()) }),
//! );
//! let sub = stream.subscribe(|view| render(view));
//! ```

mod cache;
mod config;
mod derived;
mod factory;
mod tracker;

pub use cache::CacheEntrySnapshot;
pub use config::{
    CleanupHook, Combiner, ErrorHook, FactoryConfig, FallbackFn, Loader, StreamConfig,
};
pub use derived::{DerivedStream, StreamReceiver, StreamSubscription};
pub use factory::{ReclaimOutcome, StreamFactory, StreamStats, StreamSummary};
pub use tracker::TrackerSnapshot;
