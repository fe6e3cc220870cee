//! Upstream source contract.
//!
//! The orchestration layer depends only on this minimal interface:
//! a [`Source`] accepts an [`Observer`] and returns a [`Binding`] that can
//! be cancelled. How the source produces values (HTTP polling, a state
//! container, a timer) is not its concern.
//!
//! [`Subject`] is the in-process implementation used for per-screen state
//! containers: it holds the current value and replays it to new observers.

mod subject;

pub use subject::Subject;

use crate::error::StreamError;
use std::sync::Arc;

type NextFn<T> = Arc<dyn Fn(T) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(StreamError) + Send + Sync>;
type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// Callbacks receiving a source's events.
pub struct Observer<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            next: Arc::clone(&self.next),
            error: self.error.clone(),
            complete: self.complete.clone(),
        }
    }
}

impl<T> Observer<T> {
    /// Observer with only a value callback.
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            next: Arc::new(next),
            error: None,
            complete: None,
        }
    }

    /// Attach an error callback.
    pub fn on_error<F>(mut self, error: F) -> Self
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(error));
        self
    }

    /// Attach a completion callback.
    pub fn on_complete<F>(mut self, complete: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.complete = Some(Arc::new(complete));
        self
    }

    pub fn next(&self, value: T) {
        (self.next)(value)
    }

    pub fn error(&self, error: StreamError) {
        if let Some(ref f) = self.error {
            f(error)
        }
    }

    pub fn complete(&self) {
        if let Some(ref f) = self.complete {
            f()
        }
    }
}

/// A live link between a source and one observer.
pub trait Binding: Send + Sync {
    /// Stop delivering events. Calling it more than once is a no-op.
    fn cancel(&self);

    fn is_cancelled(&self) -> bool;
}

/// Anything that can be subscribed to.
pub trait Source<T>: Send + Sync {
    fn subscribe(&self, observer: Observer<T>) -> Box<dyn Binding>;
}

impl<T, S> Source<T> for Arc<S>
where
    S: Source<T> + ?Sized,
{
    fn subscribe(&self, observer: Observer<T>) -> Box<dyn Binding> {
        (**self).subscribe(observer)
    }
}
