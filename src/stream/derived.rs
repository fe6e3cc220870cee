//! The derived stream pipeline.
//!
//! One [`StreamCore`] per stream instance runs, in order:
//! combine-latest over the sources, optional debounce, placeholder
//! substitution, the combiner, deduplication against the previous output,
//! error containment, and replay of the latest value to new consumers.
//!
//! Source callbacks hold only a weak reference plus the connection epoch
//! they were created for, so values arriving after a disconnect (or after
//! the stream is gone) are dropped on the floor.

use super::config::{CleanupHook, Combiner, ErrorHook, FallbackFn, Loader, StreamConfig};
use super::tracker::StreamActivity;
use crate::error::{panic_message, StreamError};
use crate::scheduler::{Scheduler, TimerId};
use crate::source::{Binding, Observer, Source};
use crate::telemetry::{StreamActivityKind, Telemetry};
use crate::types::{FallbackContext, SlotValue, StreamMode, Timestamp, ViewModel};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

type ConsumerFn<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Resolved, immutable description of a pipeline.
pub(crate) struct Pipeline<I, T> {
    name: String,
    mode: StreamMode,
    debounce_ms: u64,
    /// Skip recombination when the input tuple did not change.
    skip_unchanged_inputs: bool,
    loaders: Vec<Loader>,
    sources: Vec<Arc<dyn Source<I>>>,
    combiner: Combiner<I, T>,
    on_error: Option<ErrorHook>,
    on_cleanup: Option<CleanupHook>,
    fallback: Option<FallbackFn<T>>,
}

impl<I, T> Pipeline<I, T> {
    pub(crate) fn from_config(config: StreamConfig<I, T>, mode: StreamMode, debounce_ms: u64) -> Self {
        Self {
            name: config.name,
            mode,
            debounce_ms,
            skip_unchanged_inputs: mode == StreamMode::Data,
            loaders: config.loaders,
            sources: config.sources,
            combiner: config.combiner,
            on_error: config.on_error,
            on_cleanup: config.on_cleanup,
            fallback: config.fallback,
        }
    }
}

struct CoreState<I, T> {
    /// Bumped on every connect; stale callbacks compare against it.
    epoch: u64,
    connected: bool,
    connected_at: Timestamp,
    first_emission_seen: bool,
    slots: Vec<Option<I>>,
    last_inputs: Option<Vec<I>>,
    last_output: Option<T>,
    consumers: BTreeMap<u64, ConsumerFn<T>>,
    next_consumer: u64,
    bindings: Vec<Box<dyn Binding>>,
    debounce_timer: Option<TimerId>,
    pending: Option<Vec<I>>,
}

/// Bindings and timer detached from a core on disconnect.
struct Released {
    bindings: Vec<Box<dyn Binding>>,
    timer: Option<TimerId>,
}

pub(crate) struct StreamCore<I, T> {
    pipeline: Pipeline<I, T>,
    activity: Arc<StreamActivity>,
    telemetry: Arc<Telemetry>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<CoreState<I, T>>,
    self_ref: Weak<Self>,
}

impl<I: SlotValue, T: ViewModel> StreamCore<I, T> {
    pub(crate) fn new(
        pipeline: Pipeline<I, T>,
        telemetry: Arc<Telemetry>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let now = scheduler.now();
        let slot_count = pipeline.sources.len();
        Arc::new_cyclic(|self_ref| Self {
            pipeline,
            activity: Arc::new(StreamActivity::new(now)),
            telemetry,
            scheduler,
            state: Mutex::new(CoreState {
                epoch: 0,
                connected: false,
                connected_at: now,
                first_emission_seen: false,
                slots: vec![None; slot_count],
                last_inputs: None,
                last_output: None,
                consumers: BTreeMap::new(),
                next_consumer: 1,
                bindings: Vec::new(),
                debounce_timer: None,
                pending: None,
            }),
            self_ref: self_ref.clone(),
        })
    }

    /// Run the loaders and bind every source. No-op while connected.
    pub(crate) fn connect(&self) {
        let epoch = {
            let mut state = self.state.lock();
            if state.connected {
                return;
            }
            state.epoch += 1;
            state.connected = true;
            state.connected_at = self.scheduler.now();
            state.first_emission_seen = false;
            state.slots = vec![None; self.pipeline.sources.len()];
            state.last_inputs = None;
            state.epoch
        };

        debug!(
            stream = %self.pipeline.name,
            mode = ?self.pipeline.mode,
            sources = self.pipeline.sources.len(),
            "connecting upstream"
        );
        self.run_loaders();

        let bindings: Vec<Box<dyn Binding>> = self
            .pipeline
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| source.subscribe(self.slot_observer(epoch, index)))
            .collect();

        let stale = {
            let mut state = self.state.lock();
            if state.connected && state.epoch == epoch {
                state.bindings.extend(bindings);
                Vec::new()
            } else {
                bindings
            }
        };
        for binding in &stale {
            cancel_binding(&self.pipeline.name, binding.as_ref());
        }
    }

    fn run_loaders(&self) {
        for (index, loader) in self.pipeline.loaders.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| loader())).unwrap_or_else(|payload| {
                Err(StreamError::Loader {
                    index,
                    message: panic_message(payload.as_ref()),
                })
            });
            if let Err(err) = outcome {
                error!(stream = %self.pipeline.name, loader = index, error = %err, "loader failed");
            }
        }
    }

    fn slot_observer(&self, epoch: u64, index: usize) -> Observer<I> {
        let on_value = self.self_ref.clone();
        let on_error = self.self_ref.clone();
        let on_complete = self.self_ref.clone();

        Observer::new(move |value| {
            if let Some(core) = on_value.upgrade() {
                core.on_slot_value(epoch, index, value);
            }
        })
        .on_error(move |err| {
            if let Some(core) = on_error.upgrade() {
                core.on_slot_error(epoch, index, err);
            }
        })
        .on_complete(move || {
            if let Some(core) = on_complete.upgrade() {
                debug!(stream = %core.pipeline.name, source = index, "source completed");
            }
        })
    }

    fn on_slot_value(&self, epoch: u64, index: usize, value: I) {
        let inputs = {
            let mut state = self.state.lock();
            if !state.connected || state.epoch != epoch {
                return;
            }
            if let Some(slot) = state.slots.get_mut(index) {
                *slot = Some(value);
            }
            if state.slots.iter().any(Option::is_none) {
                return;
            }
            let inputs: Vec<I> = state.slots.iter().flatten().cloned().collect();

            if self.pipeline.debounce_ms > 0 {
                state.pending = Some(inputs);
                if let Some(timer) = state.debounce_timer.take() {
                    self.scheduler.cancel(timer);
                }
                let core = self.self_ref.clone();
                state.debounce_timer = Some(self.scheduler.schedule(
                    self.pipeline.debounce_ms,
                    Box::new(move || {
                        if let Some(core) = core.upgrade() {
                            core.flush_pending(epoch);
                        }
                    }),
                ));
                return;
            }
            inputs
        };
        self.recombine(epoch, inputs);
    }

    fn on_slot_error(&self, epoch: u64, index: usize, err: StreamError) {
        {
            let state = self.state.lock();
            if !state.connected || state.epoch != epoch {
                return;
            }
        }
        let err = match err {
            err @ StreamError::Source { .. } => err,
            other => StreamError::source(index, other.to_string()),
        };
        self.contain(epoch, err);
    }

    fn flush_pending(&self, epoch: u64) {
        let inputs = {
            let mut state = self.state.lock();
            if !state.connected || state.epoch != epoch {
                return;
            }
            state.debounce_timer = None;
            state.pending.take()
        };
        if let Some(inputs) = inputs {
            self.recombine(epoch, inputs);
        }
    }

    fn recombine(&self, epoch: u64, inputs: Vec<I>) {
        if self.pipeline.skip_unchanged_inputs {
            let mut state = self.state.lock();
            if state.last_inputs.as_ref() == Some(&inputs) {
                return;
            }
            state.last_inputs = Some(inputs.clone());
        }

        let slots: Vec<I> = inputs.iter().map(SlotValue::or_placeholder).collect();
        let combiner = &self.pipeline.combiner;
        let result = catch_unwind(AssertUnwindSafe(|| combiner(&slots)))
            .unwrap_or_else(|payload| Err(StreamError::combiner(panic_message(payload.as_ref()))));

        match result {
            Ok(value) => self.deliver(epoch, value),
            Err(err) => self.contain(epoch, err),
        }
    }

    /// Swap a failure for the fallback value and notify the side channel.
    fn contain(&self, epoch: u64, err: StreamError) {
        error!(stream = %self.pipeline.name, error = %err, "stream error contained");
        self.telemetry
            .record_stream(&self.pipeline.name, StreamActivityKind::Error);

        if let Some(hook) = &self.pipeline.on_error {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(&err))) {
                warn!(
                    stream = %self.pipeline.name,
                    error = %StreamError::from_panic(payload),
                    "error hook panicked"
                );
            }
        }

        let ctx = FallbackContext {
            stream: &self.pipeline.name,
            mode: self.pipeline.mode,
            error: &err,
        };
        let fallback = match &self.pipeline.fallback {
            Some(build) => {
                catch_unwind(AssertUnwindSafe(|| build(&ctx))).unwrap_or_else(|_| T::fallback(&ctx))
            }
            None => T::fallback(&ctx),
        };
        self.deliver(epoch, fallback);
    }

    fn deliver(&self, epoch: u64, value: T) {
        let (targets, first_latency) = {
            let mut state = self.state.lock();
            if !state.connected || state.epoch != epoch {
                return;
            }
            if state.last_output.as_ref() == Some(&value) {
                return;
            }
            state.last_output = Some(value.clone());
            let first_latency = if state.first_emission_seen {
                None
            } else {
                state.first_emission_seen = true;
                Some(self.scheduler.now().since(state.connected_at))
            };
            let targets: Vec<ConsumerFn<T>> = state.consumers.values().cloned().collect();
            (targets, first_latency)
        };

        if let Some(ms) = first_latency {
            self.telemetry.record_stream(
                &self.pipeline.name,
                StreamActivityKind::Subscription {
                    duration_ms: Some(ms),
                },
            );
        }
        for consumer in &targets {
            self.notify(consumer, value.clone());
        }
    }

    fn notify(&self, consumer: &ConsumerFn<T>, value: T) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| consumer(value))) {
            warn!(
                stream = %self.pipeline.name,
                error = %StreamError::from_panic(payload),
                "consumer panicked"
            );
        }
    }
}

impl<I, T> StreamCore<I, T> {
    fn release(state: &mut CoreState<I, T>) -> Released {
        state.connected = false;
        state.pending = None;
        Released {
            bindings: std::mem::take(&mut state.bindings),
            timer: state.debounce_timer.take(),
        }
    }

    fn finish_release(&self, released: Released) {
        if let Some(timer) = released.timer {
            self.scheduler.cancel(timer);
        }
        for binding in &released.bindings {
            cancel_binding(&self.pipeline.name, binding.as_ref());
        }
        debug!(
            stream = %self.pipeline.name,
            bindings = released.bindings.len(),
            "released upstream bindings"
        );
        if let Some(hook) = &self.pipeline.on_cleanup {
            if catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                warn!(stream = %self.pipeline.name, "cleanup hook panicked");
            }
        }
    }
}

impl<I, T> Drop for StreamCore<I, T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.connected {
            let released = Self::release(state);
            self.finish_release(released);
        }
    }
}

fn cancel_binding(stream: &str, binding: &dyn Binding) {
    if binding.is_cancelled() {
        return;
    }
    if catch_unwind(AssertUnwindSafe(|| binding.cancel())).is_err() {
        warn!(stream = %stream, "binding panicked during cancel");
    }
}

/// Type-erased operations a [`DerivedStream`] forwards to its core.
pub(crate) trait StreamOps<T>: Send + Sync {
    fn name(&self) -> &str;
    fn mode(&self) -> StreamMode;
    fn attach(&self, consumer: ConsumerFn<T>) -> u64;
    fn detach(&self, id: u64);
    fn latest(&self) -> Option<T>;
    fn consumer_count(&self) -> usize;
    fn is_connected(&self) -> bool;
    fn activity(&self) -> &Arc<StreamActivity>;
}

impl<I: SlotValue, T: ViewModel> StreamOps<T> for StreamCore<I, T> {
    fn name(&self) -> &str {
        &self.pipeline.name
    }

    fn mode(&self) -> StreamMode {
        self.pipeline.mode
    }

    fn attach(&self, consumer: ConsumerFn<T>) -> u64 {
        self.activity.consumer_added(self.scheduler.now());
        let (id, replay, needs_connect) = {
            let mut state = self.state.lock();
            let id = state.next_consumer;
            state.next_consumer += 1;
            state.consumers.insert(id, Arc::clone(&consumer));
            (id, state.last_output.clone(), !state.connected)
        };

        if let Some(value) = replay {
            self.notify(&consumer, value);
        }
        if needs_connect {
            self.connect();
        }
        id
    }

    fn detach(&self, id: u64) {
        let released = {
            let mut state = self.state.lock();
            if state.consumers.remove(&id).is_none() {
                return;
            }
            self.activity.consumer_removed(self.scheduler.now());
            let refcounted = self.pipeline.mode == StreamMode::Component;
            if refcounted && state.connected && state.consumers.is_empty() {
                Some(Self::release(&mut state))
            } else {
                None
            }
        };
        if let Some(released) = released {
            self.finish_release(released);
        }
    }

    fn latest(&self) -> Option<T> {
        self.state.lock().last_output.clone()
    }

    fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn activity(&self) -> &Arc<StreamActivity> {
        &self.activity
    }
}

/// Handle to a derived stream.
///
/// Cloning the handle shares the same underlying stream.
pub struct DerivedStream<T> {
    core: Arc<dyn StreamOps<T>>,
}

impl<T> Clone for DerivedStream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: ViewModel> DerivedStream<T> {
    pub(crate) fn from_core<I: SlotValue>(core: Arc<StreamCore<I, T>>) -> Self {
        Self { core }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn mode(&self) -> StreamMode {
        self.core.mode()
    }

    /// Receive every value the stream emits.
    ///
    /// The latest value, if any, is delivered before this returns. A UI-mode
    /// stream connects upstream on its first consumer. Dropping the returned
    /// subscription detaches the consumer.
    pub fn subscribe<F>(&self, consumer: F) -> StreamSubscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = self.core.attach(Arc::new(consumer));
        let core = Arc::clone(&self.core);
        StreamSubscription {
            detach: Some(Box::new(move || core.detach(id))),
        }
    }

    /// Receive values over a channel instead of a callback.
    pub fn subscribe_channel(&self) -> StreamReceiver<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let subscription = self.subscribe(move |value| {
            let _ = tx.send(value);
        });
        StreamReceiver { rx, subscription }
    }

    /// Most recently emitted value.
    pub fn latest(&self) -> Option<T> {
        self.core.latest()
    }

    pub fn consumer_count(&self) -> usize {
        self.core.consumer_count()
    }

    /// Whether upstream sources are currently bound.
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// True if both handles refer to the same stream instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.core), Arc::as_ptr(&other.core))
    }

    pub(crate) fn activity(&self) -> Arc<StreamActivity> {
        Arc::clone(self.core.activity())
    }
}

impl<T> std::fmt::Debug for DerivedStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedStream")
            .field("name", &self.core.name())
            .field("mode", &self.core.mode())
            .finish()
    }
}

/// A consumer's attachment to a derived stream.
///
/// Detaches on [`unsubscribe`](Self::unsubscribe) or drop, whichever comes first.
pub struct StreamSubscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl StreamSubscription {
    pub fn unsubscribe(mut self) {
        self.detach_now();
    }

    fn detach_now(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.detach_now();
    }
}

/// Channel-backed consumer of a derived stream.
pub struct StreamReceiver<T> {
    rx: Receiver<T>,
    subscription: StreamSubscription,
}

impl<T> StreamReceiver<T> {
    /// Block until the next value arrives.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Every value already queued.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
