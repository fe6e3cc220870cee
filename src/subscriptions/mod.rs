//! Subscription registry.
//!
//! Every binding to an upstream source opened on behalf of a named store
//! goes through a [`ManagedStore`], which:
//! - assigns it a [`SubscriptionId`](crate::types::SubscriptionId)
//! - removes the record after a terminal event (with a short grace delay)
//! - lets callers cancel one subscription or all of them
//!
//! Stores report every open and close to [`Telemetry`](crate::telemetry::Telemetry)
//! and expose pressure against the warning and leak thresholds in their stats.
//!
//! # Example
//!
//! ```ignore
//! let store = registry.register_store("IndicatorsStore");
//! let id = store.open(&subject, Observer::new(|v| println!("{v:?}")));
//! assert!(store.close(&id));
//! assert!(!store.close(&id)); // already cleaned
//! ```

mod manager;
mod registry;
mod types;

pub use manager::ManagedStore;
pub use registry::StoreRegistry;
pub use types::{
    GlobalStoreStats, ManagedSubscriptionInfo, Pressure, StoreConfig, StoreStats,
    DEFAULT_SOURCE_KIND,
};
