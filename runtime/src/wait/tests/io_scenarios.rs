// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! End-to-end readiness scenarios: handler registration through callback delivery via
//! the event service loop.

use super::pipe_pair;
use crate::core::{RuntimeConfig, TickClock};
use crate::event::{EventService, ServiceFlags};
use crate::wait::{HandlerFlags, IoMask, WaitService};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn services() -> (Arc<EventService>, Arc<WaitService>) {
    let config = RuntimeConfig::default();
    let events = Arc::new(EventService::new(TickClock::new(), &config));
    let wait = WaitService::new(&events, &config).unwrap();
    (events, wait)
}

#[test]
fn readable_pipe_invokes_callback_exactly_once_without_rearm() {
    let (events, wait) = services();
    let (read_fd, write_fd) = pipe_pair();

    let fired = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);
    let observed_in_callback = Arc::clone(&observed);

    let handle = wait
        .create_handler(
            read_fd.fd(),
            IoMask::READABLE,
            None,
            Box::new(move |context| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
                observed_in_callback.store(context.mask.bits() as usize, Ordering::SeqCst);
            }),
            HandlerFlags::empty(),
        )
        .unwrap();

    write_fd.write_byte(b'x');
    let dispatched = events.service_events(1_000, ServiceFlags::ONCE).unwrap();
    assert_eq!(dispatched, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(
        observed.load(Ordering::SeqCst),
        IoMask::READABLE.bits() as usize
    );

    // Readiness is suppressed until the callback re-arms; a second write without a
    // re-arm must not fire the callback again.
    write_fd.write_byte(b'y');
    events.service_events(100, ServiceFlags::empty()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Re-arming delivers the (still-buffered) readiness again.
    wait.wait_on(handle, IoMask::READABLE).unwrap();
    events.service_events(1_000, ServiceFlags::ONCE).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 2);
    read_fd.drain();
}

#[test]
fn callback_can_rearm_itself_from_inside() {
    let (events, wait) = services();
    let (read_fd, write_fd) = pipe_pair();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);
    let wait_for_rearm = Arc::downgrade(&wait);

    wait.create_handler(
        read_fd.fd(),
        IoMask::READABLE,
        None,
        Box::new(move |context| {
            fired_in_callback.fetch_add(1, Ordering::SeqCst);
            if let Some(wait) = wait_for_rearm.upgrade() {
                wait.wait_on(context.handler, IoMask::READABLE).unwrap();
            }
        }),
        HandlerFlags::empty(),
    )
    .unwrap();

    write_fd.write_byte(b'a');
    events.service_events(1_000, ServiceFlags::ONCE).unwrap();
    // The byte is still buffered and the handler re-armed itself, so the next turn
    // fires again.
    events.service_events(1_000, ServiceFlags::ONCE).unwrap();
    assert!(fired.load(Ordering::SeqCst) >= 2);
}

#[test]
fn immediate_handler_runs_on_the_service_thread() {
    let (events, wait) = services();
    let (read_fd, write_fd) = pipe_pair();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    wait.create_handler(
        read_fd.fd(),
        IoMask::READABLE,
        None,
        Box::new(move |_| {
            fired_in_callback.fetch_add(1, Ordering::SeqCst);
        }),
        HandlerFlags::IMMEDIATE,
    )
    .unwrap();

    write_fd.write_byte(b'x');
    // Immediate handlers bypass the event queue entirely: the wait turn invokes them
    // and service_events reports zero dispatched events.
    let dispatched = events.service_events(100, ServiceFlags::empty()).unwrap();
    assert_eq!(dispatched, 0);
    assert!(fired.load(Ordering::SeqCst) >= 1);
}

#[test]
fn recall_fires_callback_without_kernel_readiness() {
    let (events, wait) = services();
    let (read_fd, _write_fd) = pipe_pair();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    let handle = wait
        .create_handler(
            read_fd.fd(),
            IoMask::READABLE,
            None,
            Box::new(move |context| {
                assert_eq!(context.mask, IoMask::READABLE);
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            HandlerFlags::empty(),
        )
        .unwrap();

    // Nothing was ever written to the pipe; the recall alone produces the callback.
    wait.recall_handler(handle);
    events.service_events(1_000, ServiceFlags::ONCE).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn remove_handler_is_idempotent_and_cancels_delivery() {
    let (events, wait) = services();
    let (read_fd, write_fd) = pipe_pair();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);

    let handle = wait
        .create_handler(
            read_fd.fd(),
            IoMask::READABLE,
            None,
            Box::new(move |_| {
                fired_in_callback.fetch_add(1, Ordering::SeqCst);
            }),
            HandlerFlags::empty(),
        )
        .unwrap();
    assert_eq!(wait.handler_count(), 1);

    write_fd.write_byte(b'x');
    wait.remove_handler(handle);
    wait.remove_handler(handle); // Second removal is a no-op.
    assert_eq!(wait.handler_count(), 0);

    events.service_events(100, ServiceFlags::empty()).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[test]
fn duplicate_fd_registration_is_rejected() {
    let (_events, wait) = services();
    let (read_fd, _write_fd) = pipe_pair();

    wait.create_handler(
        read_fd.fd(),
        IoMask::READABLE,
        None,
        Box::new(|_| {}),
        HandlerFlags::empty(),
    )
    .unwrap();
    let err = wait
        .create_handler(
            read_fd.fd(),
            IoMask::READABLE,
            None,
            Box::new(|_| {}),
            HandlerFlags::empty(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        crate::core::RuntimeError::InvalidArgument { .. }
    ));
}

#[test]
fn oversized_fd_is_out_of_range() {
    let (_events, wait) = services();
    let err = wait
        .create_handler(
            RuntimeConfig::default().max_fd + 10,
            IoMask::READABLE,
            None,
            Box::new(|_| {}),
            HandlerFlags::empty(),
        )
        .unwrap_err();
    assert!(matches!(err, crate::core::RuntimeError::OutOfRange { .. }));
}
