//! Multicast state cell.

use super::{Binding, Observer, Source};
use crate::error::StreamError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone)]
enum Terminal {
    Error(StreamError),
    Complete,
}

struct Entry<T> {
    observer: Observer<T>,
    cancelled: Arc<AtomicBool>,
}

struct SubjectState<T> {
    value: Option<T>,
    observers: BTreeMap<u64, Entry<T>>,
    terminal: Option<Terminal>,
    next_id: u64,
}

struct SubjectInner<T> {
    state: Mutex<SubjectState<T>>,
}

/// A source that holds a current value and replays it to new observers.
///
/// After `error` or `complete` the subject is terminated: further values
/// are ignored and late observers receive the terminal event immediately.
pub struct Subject<T> {
    inner: Arc<SubjectInner<T>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Subject<T> {
    /// Empty subject; observers wait for the first value.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Subject seeded with an initial value.
    pub fn with_value(value: T) -> Self {
        Self::build(Some(value))
    }

    fn build(value: Option<T>) -> Self {
        Self {
            inner: Arc::new(SubjectInner {
                state: Mutex::new(SubjectState {
                    value,
                    observers: BTreeMap::new(),
                    terminal: None,
                    next_id: 1,
                }),
            }),
        }
    }

    /// Store a new value and deliver it to every observer.
    pub fn next(&self, value: T) {
        let targets = {
            let mut state = self.inner.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.value = Some(value.clone());
            Self::snapshot(&state)
        };
        for (observer, cancelled) in targets {
            if !cancelled.load(Ordering::SeqCst) {
                observer.next(value.clone());
            }
        }
    }

    /// Derive the next value from the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let value = {
            let state = self.inner.state.lock();
            f(state.value.as_ref())
        };
        self.next(value);
    }

    /// Terminate with an error.
    pub fn error(&self, error: StreamError) {
        for (observer, cancelled) in self.terminate(Terminal::Error(error.clone())) {
            if !cancelled.load(Ordering::SeqCst) {
                observer.error(error.clone());
            }
        }
    }

    /// Terminate normally.
    pub fn complete(&self) {
        for (observer, cancelled) in self.terminate(Terminal::Complete) {
            if !cancelled.load(Ordering::SeqCst) {
                observer.complete();
            }
        }
    }

    /// Current value, if any.
    pub fn value(&self) -> Option<T> {
        self.inner.state.lock().value.clone()
    }

    /// Number of observers still attached.
    pub fn observer_count(&self) -> usize {
        self.inner.state.lock().observers.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminal.is_some()
    }

    fn terminate(&self, terminal: Terminal) -> Vec<(Observer<T>, Arc<AtomicBool>)> {
        let mut state = self.inner.state.lock();
        if state.terminal.is_some() {
            return Vec::new();
        }
        state.terminal = Some(terminal);
        let observers = std::mem::take(&mut state.observers);
        observers
            .into_values()
            .map(|e| (e.observer, e.cancelled))
            .collect()
    }

    fn snapshot(state: &SubjectState<T>) -> Vec<(Observer<T>, Arc<AtomicBool>)> {
        state
            .observers
            .values()
            .map(|e| (e.observer.clone(), Arc::clone(&e.cancelled)))
            .collect()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Source<T> for Subject<T> {
    fn subscribe(&self, observer: Observer<T>) -> Box<dyn Binding> {
        let cancelled = Arc::new(AtomicBool::new(false));

        let (id, replay, terminal) = {
            let mut state = self.inner.state.lock();
            if let Some(ref terminal) = state.terminal {
                (None, None, Some(terminal.clone()))
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.observers.insert(
                    id,
                    Entry {
                        observer: observer.clone(),
                        cancelled: Arc::clone(&cancelled),
                    },
                );
                (Some(id), state.value.clone(), None)
            }
        };

        match terminal {
            Some(Terminal::Error(e)) => observer.error(e),
            Some(Terminal::Complete) => observer.complete(),
            None => {
                if let Some(value) = replay {
                    if !cancelled.load(Ordering::SeqCst) {
                        observer.next(value);
                    }
                }
            }
        }

        if id.is_none() {
            cancelled.store(true, Ordering::SeqCst);
        }

        Box::new(SubjectBinding {
            id,
            subject: Arc::downgrade(&self.inner),
            cancelled,
        })
    }
}

struct SubjectBinding<T> {
    id: Option<u64>,
    subject: Weak<SubjectInner<T>>,
    cancelled: Arc<AtomicBool>,
}

impl<T: Send + Sync> Binding for SubjectBinding<T> {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let (Some(id), Some(inner)) = (self.id, self.subject.upgrade()) {
            inner.state.lock().observers.remove(&id);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn collector() -> (Observer<i32>, Arc<Mutex<Vec<i32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        (Observer::new(move |v| s.lock().push(v)), seen)
    }

    #[test]
    fn test_replays_current_value() {
        let subject = Subject::with_value(7);
        let (observer, seen) = collector();
        let _binding = subject.subscribe(observer);
        subject.next(8);
        assert_eq!(*seen.lock(), vec![7, 8]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let subject = Subject::new();
        let (observer, seen) = collector();
        let binding = subject.subscribe(observer);
        assert_eq!(subject.observer_count(), 1);

        binding.cancel();
        binding.cancel();
        assert!(binding.is_cancelled());
        assert_eq!(subject.observer_count(), 0);

        subject.next(1);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_terminal_events() {
        let subject = Subject::<i32>::new();
        let errors = Arc::new(AtomicUsize::new(0));
        let e = Arc::clone(&errors);
        let _binding = subject.subscribe(Observer::new(|_| {}).on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        }));

        subject.error(StreamError::source(0, "down"));
        subject.error(StreamError::source(0, "again"));
        subject.next(3);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(subject.is_terminated());
        assert_eq!(subject.observer_count(), 0);

        // Late observers see the terminal event and get an inert binding.
        let completed = Arc::new(AtomicUsize::new(0));
        let late_errors = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&completed);
        let le = Arc::clone(&late_errors);
        let late = subject.subscribe(
            Observer::new(|_| {})
                .on_error(move |_| {
                    le.fetch_add(1, Ordering::SeqCst);
                })
                .on_complete(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
        );
        assert_eq!(late_errors.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert!(late.is_cancelled());
    }

    #[test]
    fn test_update_uses_current_value() {
        let subject = Subject::with_value(1);
        subject.update(|v| v.copied().unwrap_or(0) + 10);
        assert_eq!(subject.value(), Some(11));
    }
}
