//! Time and deferred execution.
//!
//! Every wait point in the orchestration layer (registry grace delay,
//! debounce, cache maintenance, reclamation sweeps) is a task handed to a
//! [`Scheduler`]. Nothing blocks while waiting.
//!
//! Two implementations are provided:
//! - [`ManualScheduler`]: virtual time, advanced explicitly by the host.
//!   Suitable for tests and for hosts that already run an event loop.
//! - [`ThreadScheduler`]: wall-clock time, tasks run on a worker thread.
//!
//! # Example
//!
//! ```ignore
//! let scheduler = ManualScheduler::new();
//! scheduler.schedule(100, Box::new(|| println!("fired")));
//! scheduler.advance(100); // prints "fired"
//! ```

mod manual;
mod thread;

pub use manual::ManualScheduler;
pub use thread::ThreadScheduler;

use crate::types::Timestamp;
use std::sync::Arc;

/// Identifier of a scheduled task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// A task that runs once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task that runs on every tick of an interval.
pub type RepeatingTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Deferred and periodic task execution.
pub trait Scheduler: Clock {
    /// Run `task` once after `delay_ms`.
    fn schedule(&self, delay_ms: u64, task: Task) -> TimerId;

    /// Run `task` every `interval_ms` until cancelled.
    fn schedule_repeating(&self, interval_ms: u64, task: RepeatingTask) -> TimerId;

    /// Cancel a pending task. Returns false if it already ran or was unknown.
    fn cancel(&self, id: TimerId) -> bool;
}
