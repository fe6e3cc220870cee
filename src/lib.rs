//! # Viewstream
//!
//! Orchestration layer between asynchronous data sources and the screens
//! that render them.
//!
//! ## Core Concepts
//!
//! - **Managed stores**: every upstream subscription is registered with its
//!   owning store, so leaks are visible and teardown is total
//! - **Derived streams**: combine-latest over several sources, deduplicated,
//!   debounced and replayed to late consumers
//! - **Two lifecycles**: reference-counted UI streams and cached data streams
//! - **Reclamation**: tiered sweeps for streams whose surface vanished
//!   without unsubscribing
//! - **Telemetry**: passive counters for leaks, cache efficiency, latency
//!   and component mounts
//!
//! ## Example
//!
//! ```ignore
//! use viewstream::{ManualScheduler, Orchestrator, OrchestratorConfig, StreamConfig, Subject};
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let orch = Orchestrator::new(OrchestratorConfig::default(), scheduler.clone());
//!
//! let kpis = Subject::with_value(json!({ "revenue": 10 }));
//! let stream = orch.create_ui_stream(
//!     StreamConfig::new("KpiSection", |v: &[Value]| Ok(json!({ "kpis": v[0] })))
//!         .source(kpis.clone()),
//! );
//! let sub = stream.subscribe(|view| println!("{view}"));
//!
//! orch.start_maintenance();
//! scheduler.advance(60_000);
//! ```

pub mod diagnostics;
pub mod error;
pub mod orchestrator;
pub mod reclaim;
pub mod scheduler;
pub mod source;
pub mod stream;
pub mod subscriptions;
pub mod telemetry;
pub mod types;

// Re-exports
pub use diagnostics::SystemReport;
pub use error::{Result, StreamError};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use reclaim::{
    path_matches, HealthReport, NoProbe, ReclaimPolicy, ReclaimReport, Reclaimer, SurfaceProbe,
    Tier,
};
pub use scheduler::{Clock, ManualScheduler, RepeatingTask, Scheduler, Task, ThreadScheduler, TimerId};
pub use source::{Binding, Observer, Source, Subject};
pub use stream::{
    CacheEntrySnapshot, DerivedStream, FactoryConfig, ReclaimOutcome, StreamConfig,
    StreamFactory, StreamReceiver, StreamStats, StreamSubscription, StreamSummary,
    TrackerSnapshot,
};
pub use subscriptions::{
    GlobalStoreStats, ManagedStore, ManagedSubscriptionInfo, Pressure, StoreConfig,
    StoreRegistry, StoreStats,
};
pub use telemetry::{
    ComponentMetricsSnapshot, HealthClass, StoreMetricsSnapshot, StreamActivityKind, StreamMetricsSnapshot, Telemetry,
    TelemetryConfig, TelemetryReport,
};
pub use types::*;
