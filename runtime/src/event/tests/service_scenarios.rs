// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use crate::core::{RuntimeConfig, RuntimeError, TickClock};
use crate::event::{
    DispatcherFlags, EventFlags, EventService, ServiceFlags, ShutdownMode,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn service() -> Arc<EventService> {
    Arc::new(EventService::new(TickClock::new(), &RuntimeConfig::default()))
}

#[test]
fn continuous_timer_fires_roughly_every_period() {
    let events = service();
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_in_callback = Arc::clone(&counter);

    let timer = events
        .create_timer_event(
            None,
            "tick",
            20,
            Box::new(move |_| {
                counter_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::empty(),
        )
        .unwrap();

    let loop_events = Arc::clone(&events);
    let worker = thread::spawn(move || {
        loop_events.service_events(250, ServiceFlags::empty()).unwrap()
    });
    thread::sleep(Duration::from_millis(200));
    events.stop_continuous_event(timer);
    let dispatched = worker.join().unwrap();

    // ~10 periods in 200 ms, with one period of slack either side for scheduler
    // jitter.
    let fired = counter.load(Ordering::SeqCst);
    assert!((8..=11).contains(&fired), "fired {fired} times");
    assert!(dispatched >= fired);
}

#[test]
fn successive_continuous_runs_are_separated_by_at_least_the_period() {
    let events = service();
    let stamps = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let stamps_in_callback = Arc::clone(&stamps);

    events
        .create_timer_event(
            None,
            "spacing",
            30,
            Box::new(move |_| {
                stamps_in_callback.lock().unwrap().push(Instant::now());
            }),
            EventFlags::empty(),
        )
        .unwrap();
    events.service_events(160, ServiceFlags::empty()).unwrap();

    let stamps = stamps.lock().unwrap();
    assert!(stamps.len() >= 2, "timer fired {} times", stamps.len());
    for pair in stamps.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        // Re-arm happens after the run, so fire-to-fire spacing is >= the period
        // (minus one tick of clock granularity).
        assert!(gap >= Duration::from_millis(29), "gap {gap:?} under period");
    }
}

#[test]
fn queue_from_another_thread_wakes_an_idle_service() {
    let events = service();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    let loop_events = Arc::clone(&events);
    let worker = thread::spawn(move || {
        let begin = Instant::now();
        let dispatched = loop_events.service_events(2_000, ServiceFlags::ONCE).unwrap();
        (dispatched, begin.elapsed())
    });

    thread::sleep(Duration::from_millis(50));
    events
        .create_event(
            None,
            "poke",
            0,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::empty(),
        )
        .unwrap();

    let (dispatched, elapsed) = worker.join().unwrap();
    assert_eq!(dispatched, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    // The queue must interrupt the 2 s sleep almost immediately.
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
}

#[test]
fn distinct_due_times_fire_in_due_order_and_ties_fifo() {
    let events = service();
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let record = |label: &'static str, order: &Arc<Mutex<Vec<&'static str>>>| {
        let order = Arc::clone(order);
        Box::new(move |_: &crate::event::EventContext| {
            order.lock().unwrap().push(label);
        })
    };

    // Queued out of due order; equal-due pair queued "first" then "second".
    events
        .create_event(None, "late", 60, record("late", &order), EventFlags::empty())
        .unwrap();
    events
        .create_event(None, "tie-first", 30, record("tie-first", &order), EventFlags::empty())
        .unwrap();
    events
        .create_event(None, "tie-second", 30, record("tie-second", &order), EventFlags::empty())
        .unwrap();
    events
        .create_event(None, "early", 5, record("early", &order), EventFlags::empty())
        .unwrap();

    events.service_events(200, ServiceFlags::empty()).unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["early", "tie-first", "tie-second", "late"]
    );
}

#[test]
fn queue_then_remove_leaves_no_trace() {
    let events = service();
    let default = events.default_dispatcher();
    let handle = events
        .create_event(None, "ghost", 50, Box::new(|_| {}), EventFlags::empty())
        .unwrap();
    assert_eq!(events.event_count(default), 1);

    events.remove_event(handle);
    assert_eq!(events.event_count(default), 0);
    // Idempotent on a now-stale handle.
    events.remove_event(handle);
    assert_eq!(events.service_events(80, ServiceFlags::empty()).unwrap(), 0);
}

#[test]
fn removed_event_is_never_invoked_again() {
    let events = service();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    let timer = events
        .create_timer_event(
            None,
            "self-stopping",
            10,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::empty(),
        )
        .unwrap();

    events.service_events(35, ServiceFlags::empty()).unwrap();
    events.remove_event(timer);
    let after_removal = fired.load(Ordering::SeqCst);
    assert!(after_removal >= 1);

    events.service_events(50, ServiceFlags::empty()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), after_removal);
}

#[test]
fn dont_queue_event_waits_for_explicit_queue() {
    let events = service();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    let handle = events
        .create_event(
            None,
            "armed-later",
            0,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::DONT_QUEUE,
        )
        .unwrap();

    assert_eq!(events.service_events(30, ServiceFlags::empty()).unwrap(), 0);
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    events.queue_event(handle).unwrap();
    assert_eq!(events.service_events(100, ServiceFlags::ONCE).unwrap(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn reschedule_moves_the_due_time() {
    let events = service();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    let handle = events
        .create_event(
            None,
            "distant",
            10_000,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::empty(),
        )
        .unwrap();

    // Pull the far-future event into the immediate window.
    events.reschedule_event(handle, 10).unwrap();
    assert_eq!(events.service_events(500, ServiceFlags::ONCE).unwrap(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn queue_on_destroyed_dispatcher_is_invalid_state() {
    let events = service();
    let doomed = events.create_dispatcher("doomed", DispatcherFlags::empty());
    events.destroy_dispatcher(doomed).unwrap();

    let err = events
        .create_event(Some(doomed), "orphan", 0, Box::new(|_| {}), EventFlags::empty())
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidState { .. }));
}

#[test]
fn busy_dispatcher_cannot_be_destroyed() {
    let events = service();
    let dispatcher = events.create_dispatcher("busy", DispatcherFlags::empty());
    events
        .create_event(Some(dispatcher), "pending", 1_000, Box::new(|_| {}), EventFlags::empty())
        .unwrap();
    let err = events.destroy_dispatcher(dispatcher).unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidState { .. }));
}

#[test]
fn disabled_dispatcher_holds_events_until_enabled() {
    let events = service();
    let dispatcher = events.create_dispatcher("parked", DispatcherFlags::empty());
    events.enable_dispatcher(dispatcher, false);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);
    events
        .create_event(
            Some(dispatcher),
            "held",
            0,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::empty(),
        )
        .unwrap();

    events.service_events(30, ServiceFlags::empty()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    events.enable_dispatcher(dispatcher, true);
    events.service_events(100, ServiceFlags::ONCE).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn immediate_stop_interrupts_the_loop() {
    let events = service();
    let loop_events = Arc::clone(&events);
    let worker = thread::spawn(move || {
        let begin = Instant::now();
        loop_events.service_events(5_000, ServiceFlags::empty()).unwrap();
        begin.elapsed()
    });

    thread::sleep(Duration::from_millis(50));
    events.request_stop(ShutdownMode::Immediate);
    let elapsed = worker.join().unwrap();
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    events.clear_stop();
}

#[test]
fn default_shutdown_mode_follows_the_configured_strategy() {
    let events = service();

    // Out of the box, Default resolves to graceful: due work drains, then the loop
    // returns instead of sleeping out its budget.
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);
    events
        .create_event(
            None,
            "due-now",
            0,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            EventFlags::empty(),
        )
        .unwrap();
    events.request_stop(ShutdownMode::Default);
    let begin = Instant::now();
    let dispatched = events.service_events(5_000, ServiceFlags::empty()).unwrap();
    assert_eq!(dispatched, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(begin.elapsed() < Duration::from_millis(600));
    events.clear_stop();

    // Reconfigured to immediate, Default interrupts a sleeping loop the same way an
    // explicit Immediate does.
    events.set_default_shutdown(ShutdownMode::Immediate);
    let loop_events = Arc::clone(&events);
    let worker = thread::spawn(move || {
        let begin = Instant::now();
        loop_events.service_events(5_000, ServiceFlags::empty()).unwrap();
        begin.elapsed()
    });
    thread::sleep(Duration::from_millis(50));
    events.request_stop(ShutdownMode::Default);
    let elapsed = worker.join().unwrap();
    assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    events.clear_stop();
}

#[test]
fn service_total_counts_queued_events() {
    let events = service();
    assert_eq!(events.queued_total(), 0);
    events
        .create_event(None, "one", 5, Box::new(|_| {}), EventFlags::empty())
        .unwrap();
    events
        .create_event(None, "two", 5, Box::new(|_| {}), EventFlags::empty())
        .unwrap();
    assert_eq!(events.queued_total(), 2);
}
