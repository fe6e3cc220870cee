//! Integration tests driving the orchestrator end to end.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use viewstream::{
    DerivedStream, ManualScheduler, Observer, Orchestrator, OrchestratorConfig, StreamConfig,
    StreamError, StreamMode, StreamSubscription, Subject, SurfaceKind, ThreadScheduler,
};

fn setup() -> (Arc<ManualScheduler>, Orchestrator) {
    let _ = tracing_subscriber::fmt::try_init();
    let clock = Arc::new(ManualScheduler::new());
    let orch = Orchestrator::new(OrchestratorConfig::default(), clock.clone());
    (clock, orch)
}

fn record(stream: &DerivedStream<Value>) -> (StreamSubscription, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    (stream.subscribe(move |v| s.lock().push(v)), seen)
}

fn first(values: &[Value]) -> Result<Value, StreamError> {
    Ok(values[0].clone())
}

// --- Derived stream pipeline ---

#[test]
fn test_combine_latest_across_three_sources() {
    let (_clock, orch) = setup();
    let (a, b, c) = (Subject::new(), Subject::new(), Subject::new());
    let stream = orch.create_ui_stream(
        StreamConfig::new("kpiSection", |v: &[Value]| {
            Ok(json!({ "a": v[0], "b": v[1], "c": v[2] }))
        })
        .source(a.clone())
        .source(b.clone())
        .source(c.clone()),
    );
    let (_sub, seen) = record(&stream);

    a.next(json!(1));
    b.next(json!("x"));
    assert!(seen.lock().is_empty());

    c.next(json!(true));
    assert_eq!(*seen.lock(), vec![json!({ "a": 1, "b": "x", "c": true })]);

    a.next(json!(2));
    assert_eq!(
        *seen.lock(),
        vec![
            json!({ "a": 1, "b": "x", "c": true }),
            json!({ "a": 2, "b": "x", "c": true }),
        ]
    );
}

#[test]
fn test_structurally_equal_outputs_are_suppressed() {
    let (_clock, orch) = setup();
    let source = Subject::new();
    let stream = orch.create_ui_stream(
        StreamConfig::new("kpiSection", |v: &[Value]| Ok(json!({ "v": v[0]["v"] })))
            .source(source.clone()),
    );
    let (_sub, seen) = record(&stream);

    source.next(json!({ "v": 1 }));
    source.next(json!({ "v": 1, "updated_at": 2 }));
    source.next(json!({ "v": 2 }));
    assert_eq!(*seen.lock(), vec![json!({ "v": 1 }), json!({ "v": 2 })]);
}

#[test]
fn test_combiner_error_is_contained_once_per_emission() {
    let (_clock, orch) = setup();
    let (a, b, c) = (
        Subject::with_value(json!(1)),
        Subject::with_value(json!("x")),
        Subject::new(),
    );
    let errors = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&errors);
    let stream = orch.create_ui_stream(
        StreamConfig::new("kpiSection", |v: &[Value]| {
            // Null slots arrive as the empty placeholder.
            if v[2] == json!({}) {
                Err(StreamError::combiner("c is missing"))
            } else {
                Ok(Value::Array(v.to_vec()))
            }
        })
        .source(a.clone())
        .source(b.clone())
        .source(c.clone())
        .on_error(move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        }),
    );
    let (_sub, seen) = record(&stream);

    c.next(json!(true));
    c.next(Value::Null);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    c.next(json!(false));
    c.next(Value::Null);
    assert_eq!(errors.load(Ordering::SeqCst), 2);

    let seen = seen.lock();
    assert_eq!(seen.len(), 4);
    assert_eq!(
        seen[1],
        json!({ "loading": false, "error": "Combiner failed: c is missing", "data": null })
    );
    assert_eq!(seen[2], json!([1, "x", false]));
    assert_eq!(seen[3], seen[1]);
    assert!(stream.is_connected());
}

#[test]
fn test_debounce_keeps_only_the_last_trigger() {
    let (clock, orch) = setup();
    let source = Subject::new();
    let stream = orch.create_ui_stream(
        StreamConfig::new("salesChart", first)
            .source(source.clone())
            .debounce_ms(50),
    );
    let (_sub, seen) = record(&stream);

    source.next(json!(1));
    clock.advance(10);
    source.next(json!(2));
    clock.advance(10);
    source.next(json!(3));
    clock.advance(49);
    assert!(seen.lock().is_empty());

    clock.advance(1);
    assert_eq!(*seen.lock(), vec![json!(3)]);
}

#[test]
fn test_form_surfaces_are_never_debounced() {
    let (clock, orch) = setup();
    let source = Subject::new();
    let stream = orch.create_ui_stream(
        StreamConfig::new("salesTarget", first)
            .source(source.clone())
            .surface(SurfaceKind::Form)
            .debounce_ms(50),
    );
    let (_sub, seen) = record(&stream);

    for v in 1..=3 {
        source.next(json!(v));
        clock.advance(5);
    }
    assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
    assert_eq!(clock.pending_count(), 0);
}

#[test]
fn test_late_subscriber_gets_replay() {
    let (_clock, orch) = setup();
    let source = Subject::with_value(json!("ready"));
    let stream = orch.create_ui_stream(StreamConfig::new("kpiSection", first).source(source.clone()));
    let (_first_sub, _) = record(&stream);

    let (_late, seen) = record(&stream);
    assert_eq!(*seen.lock(), vec![json!("ready")]);
}

// --- Lifecycles ---

#[test]
fn test_subscription_lifecycle_is_net_zero() {
    let (_clock, orch) = setup();
    let store = orch.store("IndicatorsStore");
    let source = Subject::with_value(json!(1));
    let before = store.active_count();

    let id = store.open(&source, Observer::new(|_: Value| {}));
    assert_eq!(store.active_count(), before + 1);

    assert!(store.close(&id));
    assert_eq!(store.active_count(), before);
    assert!(!store.close(&id));
    assert_eq!(source.observer_count(), 0);

    let stats = orch.telemetry().store_snapshot("IndicatorsStore").unwrap();
    assert_eq!(stats.active_subscriptions, 0);
    assert_eq!(stats.total_closed, 1);
}

#[test]
fn test_terminal_events_clean_up_after_grace_delay() {
    let (clock, orch) = setup();
    let store = orch.store("IndicatorsStore");
    let source: Subject<Value> = Subject::new();
    let seen_error = Arc::new(Mutex::new(None));
    let se = Arc::clone(&seen_error);
    store.open(
        &source,
        Observer::new(|_: Value| {}).on_error(move |err| *se.lock() = Some(err)),
    );

    source.error(StreamError::source(0, "503"));
    assert!(seen_error.lock().is_some());
    assert_eq!(store.active_count(), 1);

    clock.advance(100);
    assert_eq!(store.active_count(), 0);
}

#[test]
fn test_data_stream_cache_window() {
    let (clock, orch) = setup();
    let source = Subject::with_value(json!(1));
    let request = || {
        orch.create_data_stream(
            StreamConfig::new("regionTotals", first)
                .source(source.clone())
                .cache_ms(1_000),
        )
    };

    let a = request();
    clock.advance(400);
    let b = request();
    assert!(a.ptr_eq(&b));
    let tracker = orch.factory().tracker("regionTotals", StreamMode::Data).unwrap();
    assert_eq!(tracker.hit_count, 1);

    clock.advance(700);
    let c = request();
    assert!(!a.ptr_eq(&c));
    let tracker = orch.factory().tracker("regionTotals", StreamMode::Data).unwrap();
    assert_eq!(tracker.hit_count, 0);
    assert_eq!(c.latest(), Some(json!(1)));
}

#[test]
fn test_last_unsubscribe_releases_upstream() {
    let (_clock, orch) = setup();
    let source = Subject::with_value(json!(1));
    let loads = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));
    let (l, c) = (Arc::clone(&loads), Arc::clone(&cleanups));
    let stream = orch.create_ui_stream(
        StreamConfig::new("kpiSection", first)
            .source(source.clone())
            .loader(move || {
                l.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .on_cleanup(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
    );
    assert_eq!(loads.load(Ordering::SeqCst), 0);

    let (sub, _) = record(&stream);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(source.observer_count(), 1);

    sub.unsubscribe();
    assert_eq!(source.observer_count(), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    assert!(!stream.is_connected());

    source.next(json!(2));
    let (_sub, seen) = record(&stream);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(source.observer_count(), 1);
    assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
}

// --- Reclamation ---

#[test]
fn test_navigation_never_reclaims_live_consumers() {
    let (_clock, orch) = setup();
    let source = Subject::with_value(json!(1));
    orch.on_navigation("/stores");
    let stream = orch.create_ui_stream(StreamConfig::new("storesTable", first).source(source.clone()));
    let (sub, _) = record(&stream);

    let report = orch.on_navigation("/contracts");
    assert!(report.reclaimed.is_empty());
    assert_eq!(report.skipped_live, vec!["storesTable"]);

    sub.unsubscribe();
    orch.on_navigation("/stores");
    let report = orch.on_navigation("/contracts");
    assert_eq!(report.reclaimed, vec!["storesTable"]);
    assert!(orch.factory().tracker("storesTable", StreamMode::Component).is_none());
}

#[test]
fn test_surface_disposed_signal() {
    let (_clock, orch) = setup();
    let source = Subject::with_value(json!(1));
    orch.create_ui_stream(StreamConfig::new("NpsModal", first).source(source.clone()));
    assert!(orch.surface_disposed("NpsModal"));
    assert!(!orch.surface_disposed("NpsModal"));
}

#[test]
fn test_shutdown_with_thread_scheduler() {
    let scheduler = Arc::new(ThreadScheduler::new());
    let orch = Orchestrator::new(OrchestratorConfig::default(), scheduler.clone());
    orch.start_maintenance();

    let store = orch.store("IndicatorsStore");
    let source: Subject<Value> = Subject::new();
    store.open(&source, Observer::new(|_: Value| {}));
    source.complete();

    let deadline = Instant::now() + Duration::from_secs(2);
    while store.active_count() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(store.active_count(), 0);

    store.open(&Subject::with_value(json!(1)), Observer::new(|_: Value| {}));
    assert_eq!(orch.shutdown(), 1);
    scheduler.shutdown();
}
