// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Registry of dispatchers and the event service loop. See [`EventService`].

use super::dispatcher::{Dispatcher, DispatcherFlags, DispatcherHandle};
use super::event::{Event, EventContext, EventFlags, EventHandle, EventProc};
use crate::core::{
    Arena, AtomicU64Ext, MAX_TIMEOUT, RuntimeConfig, RuntimeError, RuntimeResult, TickClock,
    Ticks, clamp_timeout,
};
use crate::wait::{IoMask, WaitService, WakeSignal};
use bitflags::bitflags;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tracing::trace;

bitflags! {
    /// Flags accepted by [`EventService::service_events`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ServiceFlags: u8 {
        /// Return after the first turn that dispatches at least one event, instead of
        /// running until the timeout expires.
        const ONCE = 0b0000_0001;
    }
}

/// How [`EventService::request_stop`] winds the loop down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Drain events that are already due, then return.
    Graceful,
    /// Return at the next loop turn without draining.
    Immediate,
    /// Use the service's configured default strategy - graceful unless
    /// [`set_default_shutdown`] changed it. This is the mode signal-driven and other
    /// "normal exit" paths pass when they have no opinion of their own.
    ///
    /// [`set_default_shutdown`]: EventService::set_default_shutdown
    Default,
}

impl Default for ShutdownMode {
    fn default() -> Self { Self::Default }
}

const STOP_NONE: u8 = 0;
const STOP_GRACEFUL: u8 = 1;
const STOP_IMMEDIATE: u8 = 2;

/// Everything the service mutates under its lock. Field-level split borrows
/// (`dispatchers` vs `events`) keep queue surgery borrow-check clean.
struct ServiceState {
    dispatchers: Arena<Dispatcher>,
    events: Arena<Event>,
    default_dispatcher: DispatcherHandle,
    nonblock_dispatcher: DispatcherHandle,
    /// Cached tick, refreshed at each claim/wait turn.
    now: Ticks,
    /// Absolute tick the sleeping service thread will wake at; `0` while awake. A
    /// concurrent queue of an earlier-due event compares against this to decide
    /// whether to wake the sleeper.
    will_awake: Ticks,
    /// Round-robin scan offset so a busy dispatcher cannot starve the others.
    rr_cursor: usize,
}

/// A claimed due event, carried out of the lock so the callback runs lock-free.
struct Turn {
    dispatcher: DispatcherHandle,
    event: EventHandle,
    callback: EventProc,
    context: EventContext,
}

/// The per-process event and dispatcher engine.
///
/// Owns every dispatcher and event in an arena; all cross-references are generation
/// checked handles, so a handle to a retired event or destroyed dispatcher fails
/// lookups instead of dangling.
///
/// A host thread drives the engine with [`service_events`]. Each turn the loop
/// dispatches everything due (round-robin across dispatchers, strictly serialized
/// within one), then blocks - in the attached [`WaitService`] when one is present so
/// I/O readiness and timers share a single sleep, otherwise on an internal condvar -
/// until the next event is due, the caller timeout expires, or another thread queues
/// earlier work and wakes it.
///
/// [`service_events`]: Self::service_events
pub struct EventService {
    clock: TickClock,
    state: Mutex<ServiceState>,
    idle: Condvar,
    /// Wake half of the attached notifier backend. Async-safe; used when a queueing
    /// thread must interrupt a sleeping service thread that is parked in the backend.
    wake: OnceLock<Arc<dyn WakeSignal>>,
    /// Attached wait service. Weak: the runtime owns both; the engine must not keep
    /// the wait service alive on its own.
    waiter: OnceLock<Weak<WaitService>>,
    /// Total events queued over the service lifetime.
    queued_total: AtomicU64,
    stop: AtomicU8,
    /// What [`ShutdownMode::Default`] resolves to.
    default_stop: AtomicU8,
}

impl EventService {
    /// Builds the service with its two built-in dispatchers: the process default and
    /// the non-blocking helper that [`QUICK`] events bind to.
    ///
    /// [`QUICK`]: EventFlags::QUICK
    #[must_use]
    pub fn new(clock: TickClock, _config: &RuntimeConfig) -> Self {
        let mut dispatchers = Arena::new();
        let default_dispatcher =
            dispatchers.insert(Dispatcher::new("default", DispatcherFlags::empty()));
        let nonblock_dispatcher =
            dispatchers.insert(Dispatcher::new("nonblock", DispatcherFlags::empty()));
        Self {
            clock,
            state: Mutex::new(ServiceState {
                dispatchers,
                events: Arena::new(),
                default_dispatcher,
                nonblock_dispatcher,
                now: clock.now_ticks(),
                will_awake: 0,
                rr_cursor: 0,
            }),
            idle: Condvar::new(),
            wake: OnceLock::new(),
            waiter: OnceLock::new(),
            queued_total: AtomicU64::new(0),
            stop: AtomicU8::new(STOP_NONE),
            default_stop: AtomicU8::new(STOP_GRACEFUL),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wires the wait service in so sleeps happen inside the notifier backend. Called
    /// once during process init; later calls are ignored.
    pub fn attach_waiter(&self, waiter: &Arc<WaitService>, wake: Arc<dyn WakeSignal>) {
        drop(self.waiter.set(Arc::downgrade(waiter)));
        drop(self.wake.set(wake));
    }

    /// The process-default dispatcher.
    #[must_use]
    pub fn default_dispatcher(&self) -> DispatcherHandle { self.lock().default_dispatcher }

    /// The non-blocking helper dispatcher used by [`QUICK`] events.
    ///
    /// [`QUICK`]: EventFlags::QUICK
    #[must_use]
    pub fn nonblock_dispatcher(&self) -> DispatcherHandle { self.lock().nonblock_dispatcher }

    /// Creates a dispatcher. Dispatchers are born enabled.
    pub fn create_dispatcher(&self, name: &str, flags: DispatcherFlags) -> DispatcherHandle {
        let mut state = self.lock();
        let handle = state.dispatchers.insert(Dispatcher::new(name, flags));
        trace!(name, ?handle, "dispatcher created");
        handle
    }

    /// Enables or disables a dispatcher. A disabled dispatcher keeps its queue but is
    /// skipped by the scheduler.
    pub fn enable_dispatcher(&self, handle: DispatcherHandle, enable: bool) {
        let mut state = self.lock();
        if let Some(dispatcher) = state.dispatchers.get_mut(handle) {
            dispatcher.flags.set(DispatcherFlags::ENABLED, enable);
        }
        drop(state);
        if enable {
            self.wake_service();
        }
    }

    /// Destroys an idle dispatcher.
    ///
    /// # Errors
    ///
    /// [`InvalidState`] if events are pending or in flight, or the handle is stale.
    ///
    /// [`InvalidState`]: RuntimeError::InvalidState
    pub fn destroy_dispatcher(&self, handle: DispatcherHandle) -> RuntimeResult<()> {
        let mut state = self.lock();
        let dispatcher = state.dispatchers.get_mut(handle).ok_or(RuntimeError::InvalidState {
            reason: "dispatcher already destroyed",
        })?;
        if !dispatcher.is_idle() {
            return Err(RuntimeError::InvalidState {
                reason: "dispatcher busy: events pending or running",
            });
        }
        dispatcher.flags.insert(DispatcherFlags::DESTROYED);
        state.dispatchers.remove(handle);
        Ok(())
    }

    /// Pending events on one dispatcher.
    #[must_use]
    pub fn event_count(&self, dispatcher: DispatcherHandle) -> usize {
        self.lock()
            .dispatchers
            .get(dispatcher)
            .map_or(0, |d| d.pending.len())
    }

    /// Total events queued since the service started.
    #[must_use]
    pub fn queued_total(&self) -> u64 { self.queued_total.load(Ordering::SeqCst) }

    /// Creates an event and (unless [`DONT_QUEUE`] is set) queues it.
    ///
    /// `dispatcher: None` binds to the process default, or the non-blocking helper
    /// when [`QUICK`] is set. `period` is the delay before the first run and the
    /// re-arm interval for [`CONTINUOUS`] events.
    ///
    /// # Errors
    ///
    /// [`InvalidState`] when the target dispatcher is destroyed or stale.
    ///
    /// [`CONTINUOUS`]: EventFlags::CONTINUOUS
    /// [`DONT_QUEUE`]: EventFlags::DONT_QUEUE
    /// [`InvalidState`]: RuntimeError::InvalidState
    /// [`QUICK`]: EventFlags::QUICK
    pub fn create_event(
        &self,
        dispatcher: Option<DispatcherHandle>,
        name: &str,
        period: Ticks,
        callback: EventProc,
        flags: EventFlags,
    ) -> RuntimeResult<EventHandle> {
        self.create_event_with_mask(dispatcher, name, period, callback, flags, IoMask::empty())
    }

    /// [`create_event`](Self::create_event) variant carrying an observed readiness
    /// mask. Used by the wait service for I/O events.
    pub fn create_event_with_mask(
        &self,
        dispatcher: Option<DispatcherHandle>,
        name: &str,
        period: Ticks,
        callback: EventProc,
        flags: EventFlags,
        mask: IoMask,
    ) -> RuntimeResult<EventHandle> {
        let mut state = self.lock();
        let target = match dispatcher {
            Some(handle) => handle,
            None if flags.contains(EventFlags::QUICK) => state.nonblock_dispatcher,
            None => state.default_dispatcher,
        };
        match state.dispatchers.get(target) {
            Some(d) if !d.flags.contains(DispatcherFlags::DESTROYED) => {}
            _ => {
                return Err(RuntimeError::InvalidState {
                    reason: "dispatcher destroyed",
                });
            }
        }
        state.now = self.clock.now_ticks();
        let timestamp = state.now;
        let event = state.events.insert(Event {
            name: name.to_string(),
            dispatcher: target,
            period,
            timestamp,
            due: timestamp + period,
            callback: Some(callback),
            flags,
            mask,
            queued: false,
        });
        let woke = if flags.contains(EventFlags::DONT_QUEUE) {
            false
        } else {
            self.queue_locked(&mut state, event)?
        };
        drop(state);
        if woke {
            self.wake_service();
        }
        Ok(event)
    }

    /// Interval timer sugar: [`create_event`](Self::create_event) with
    /// [`CONTINUOUS`](EventFlags::CONTINUOUS) added.
    ///
    /// # Errors
    ///
    /// Same as [`create_event`](Self::create_event).
    pub fn create_timer_event(
        &self,
        dispatcher: Option<DispatcherHandle>,
        name: &str,
        period: Ticks,
        callback: EventProc,
        flags: EventFlags,
    ) -> RuntimeResult<EventHandle> {
        self.create_event(dispatcher, name, period, callback, flags | EventFlags::CONTINUOUS)
    }

    /// Queues an event created with [`DONT_QUEUE`](EventFlags::DONT_QUEUE), or
    /// re-queues one that was dequeued.
    ///
    /// # Errors
    ///
    /// [`NotFound`] for a stale handle, [`InvalidState`] for a destroyed dispatcher or
    /// an event that is already queued or running.
    ///
    /// [`InvalidState`]: RuntimeError::InvalidState
    /// [`NotFound`]: RuntimeError::NotFound
    pub fn queue_event(&self, event: EventHandle) -> RuntimeResult<()> {
        let mut state = self.lock();
        match state.events.get(event) {
            None => return Err(RuntimeError::NotFound),
            Some(e) if e.queued || e.flags.contains(EventFlags::RUNNING) => {
                return Err(RuntimeError::InvalidState {
                    reason: "event already queued or running",
                });
            }
            Some(_) => {}
        }
        let woke = self.queue_locked(&mut state, event)?;
        drop(state);
        if woke {
            self.wake_service();
        }
        Ok(())
    }

    /// Inserts `event` into its dispatcher's pending queue at the unique position that
    /// keeps the queue non-decreasing by `due`; equal-due events go **after** existing
    /// ones so ties fire in queue order. Returns whether the sleeping service thread
    /// needs a wake.
    fn queue_locked(
        &self,
        state: &mut ServiceState,
        event: EventHandle,
    ) -> RuntimeResult<bool> {
        let ServiceState {
            dispatchers,
            events,
            will_awake,
            ..
        } = state;
        let (target, due) = match events.get(event) {
            Some(e) => (e.dispatcher, e.due),
            None => return Err(RuntimeError::NotFound),
        };
        let dispatcher = dispatchers.get_mut(target).ok_or(RuntimeError::InvalidState {
            reason: "dispatcher destroyed",
        })?;
        if dispatcher.flags.contains(DispatcherFlags::DESTROYED) {
            return Err(RuntimeError::InvalidState {
                reason: "dispatcher destroyed",
            });
        }
        let at = dispatcher
            .pending
            .partition_point(|&h| events.get(h).is_some_and(|e| e.due <= due));
        dispatcher.pending.insert(at, event);
        if let Some(e) = events.get_mut(event) {
            e.queued = true;
        }
        self.queued_total.increment();
        trace!(?event, due, at, "event queued");

        Ok(dispatcher.is_enabled() && *will_awake != 0 && due < *will_awake)
    }

    /// Removes an event. Idempotent: stale handles are ignored.
    ///
    /// Safe on a running event - its callback is not interrupted, but the continuous
    /// flag is cleared so it will not re-arm, and it retires when the run completes.
    /// If the removed event was the one the sleeping service was waiting for, the
    /// service is woken to recompute its wait.
    pub fn remove_event(&self, event: EventHandle) {
        let mut state = self.lock();
        let Some(e) = state.events.get_mut(event) else {
            return;
        };
        e.flags.remove(EventFlags::CONTINUOUS | EventFlags::REQUEUE);
        if e.flags.contains(EventFlags::RUNNING) {
            // Retires in finish_turn.
            return;
        }
        let was_due = e.due;
        let target = e.dispatcher;
        let was_queued = e.queued;
        state.events.remove(event);

        let will_awake = state.will_awake;
        let mut reschedule = false;
        if was_queued
            && let Some(dispatcher) = state.dispatchers.get_mut(target)
        {
            dispatcher.unlink(event);
            reschedule = dispatcher.is_enabled()
                && will_awake != 0
                && was_due == will_awake
                && !dispatcher.pending.is_empty();
        }
        drop(state);
        if reschedule {
            self.wake_service();
        }
    }

    /// Recomputes `due = now + period` and re-queues the event.
    ///
    /// On a running event the new schedule takes effect when the current run
    /// completes.
    ///
    /// # Errors
    ///
    /// [`NotFound`] for a stale handle; [`InvalidState`] if the dispatcher is gone.
    ///
    /// [`InvalidState`]: RuntimeError::InvalidState
    /// [`NotFound`]: RuntimeError::NotFound
    pub fn reschedule_event(&self, event: EventHandle, period: Ticks) -> RuntimeResult<()> {
        let mut state = self.lock();
        state.now = self.clock.now_ticks();
        let now = state.now;
        let Some(e) = state.events.get_mut(event) else {
            return Err(RuntimeError::NotFound);
        };
        e.period = period;
        e.timestamp = now;
        e.due = now + period;
        if e.flags.contains(EventFlags::RUNNING) {
            e.flags.insert(EventFlags::REQUEUE);
            return Ok(());
        }
        if e.queued {
            let target = e.dispatcher;
            e.queued = false;
            if let Some(dispatcher) = state.dispatchers.get_mut(target) {
                dispatcher.unlink(event);
            }
        }
        let woke = self.queue_locked(&mut state, event)?;
        drop(state);
        if woke {
            self.wake_service();
        }
        Ok(())
    }

    /// Clears the continuous flag; the event stops after its current or next run.
    pub fn stop_continuous_event(&self, event: EventHandle) {
        let mut state = self.lock();
        if let Some(e) = state.events.get_mut(event) {
            e.flags.remove(EventFlags::CONTINUOUS);
        }
    }

    /// Restores the continuous flag and reschedules at the event's period.
    ///
    /// # Errors
    ///
    /// Same as [`reschedule_event`](Self::reschedule_event).
    pub fn restart_continuous_event(&self, event: EventHandle) -> RuntimeResult<()> {
        let period = {
            let mut state = self.lock();
            let Some(e) = state.events.get_mut(event) else {
                return Err(RuntimeError::NotFound);
            };
            e.flags.insert(EventFlags::CONTINUOUS);
            e.period
        };
        self.reschedule_event(event, period)
    }

    /// Sets or clears the continuous flag without rescheduling.
    pub fn enable_continuous_event(&self, event: EventHandle, enable: bool) {
        let mut state = self.lock();
        if let Some(e) = state.events.get_mut(event) {
            e.flags.set(EventFlags::CONTINUOUS, enable);
        }
    }

    /// Reconfigures what [`ShutdownMode::Default`] means for this service. `Default`
    /// itself restores the built-in graceful strategy.
    pub fn set_default_shutdown(&self, mode: ShutdownMode) {
        let value = match mode {
            ShutdownMode::Graceful | ShutdownMode::Default => STOP_GRACEFUL,
            ShutdownMode::Immediate => STOP_IMMEDIATE,
        };
        self.default_stop.store(value, Ordering::SeqCst);
    }

    /// Requests loop shutdown and wakes any sleeping service thread.
    pub fn request_stop(&self, mode: ShutdownMode) {
        let value = match mode {
            ShutdownMode::Graceful => STOP_GRACEFUL,
            ShutdownMode::Immediate => STOP_IMMEDIATE,
            ShutdownMode::Default => self.default_stop.load(Ordering::SeqCst),
        };
        self.stop.store(value, Ordering::SeqCst);
        self.wake_service();
    }

    /// Clears a previous stop request so the loop can be driven again.
    pub fn clear_stop(&self) { self.stop.store(STOP_NONE, Ordering::SeqCst) }

    /// Runs the service loop for up to `timeout` milliseconds (negative = forever,
    /// clamped to the platform maximum). Returns the number of events dispatched.
    ///
    /// Each turn: dispatch everything due across enabled dispatchers (round-robin,
    /// serialized per dispatcher), then sleep until the earliest `due` or the timeout.
    /// With [`ONCE`](ServiceFlags::ONCE), returns as soon as one turn has dispatched
    /// something.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) from the notifier backend.
    pub fn service_events(&self, timeout: Ticks, flags: ServiceFlags) -> RuntimeResult<usize> {
        let begin = self.clock.now_ticks();
        let budget = clamp_timeout(timeout, MAX_TIMEOUT);
        let mut dispatched = 0usize;

        loop {
            while let Some(turn) = self.claim_turn() {
                let Turn {
                    dispatcher,
                    event,
                    mut callback,
                    context,
                } = turn;
                (callback)(&context);
                self.finish_turn(dispatcher, event, callback);
                dispatched += 1;
                if self.stop.load(Ordering::SeqCst) == STOP_IMMEDIATE {
                    break;
                }
            }

            match self.stop.load(Ordering::SeqCst) {
                STOP_IMMEDIATE => break,
                STOP_GRACEFUL => break, // Everything due has been drained above.
                _ => {}
            }
            if flags.contains(ServiceFlags::ONCE) && dispatched > 0 {
                break;
            }
            let elapsed = self.clock.now_ticks() - begin;
            if elapsed >= budget {
                break;
            }
            self.wait_turn(budget - elapsed)?;
        }
        Ok(dispatched)
    }

    /// Claims the next due event: moves it from its dispatcher's pending queue into the
    /// current slot, marks the dispatcher owned by this thread, and carries the
    /// callback out of the lock.
    fn claim_turn(&self) -> Option<Turn> {
        let mut state = self.lock();
        state.now = self.clock.now_ticks();
        let now = state.now;

        let handles = state.dispatchers.handles();
        if handles.is_empty() {
            return None;
        }
        let start = state.rr_cursor % handles.len();
        let order = handles[start..].iter().chain(handles[..start].iter());

        for (offset, &dh) in order.enumerate() {
            let ServiceState {
                dispatchers,
                events,
                rr_cursor,
                ..
            } = &mut *state;
            let Some(dispatcher) = dispatchers.get_mut(dh) else {
                continue;
            };
            if !dispatcher.claimable() {
                continue;
            }
            let head = dispatcher.pending[0];
            let Some(event) = events.get_mut(head) else {
                // Stale handle at the queue head; drop it and look again next turn.
                dispatcher.pending.remove(0);
                continue;
            };
            if event.due > now {
                continue;
            }
            let Some(callback) = event.callback.take() else {
                continue;
            };
            event.queued = false;
            event.flags.insert(EventFlags::RUNNING);
            let context = EventContext {
                event: head,
                mask: event.mask,
                now,
            };
            trace!(name = %event.name, ?head, "event dispatched");

            dispatcher.pending.remove(0);
            dispatcher.current = Some(head);
            dispatcher.owner = Some(std::thread::current().id());
            *rr_cursor = (start + offset + 1) % handles.len();

            return Some(Turn {
                dispatcher: dh,
                event: head,
                callback,
                context,
            });
        }
        None
    }

    /// Puts a completed run to rest: re-arms continuous events, retires everything
    /// else, releases the dispatcher, and reaps drained auto-dispatchers.
    fn finish_turn(&self, dispatcher: DispatcherHandle, event: EventHandle, callback: EventProc) {
        let mut state = self.lock();
        state.now = self.clock.now_ticks();
        let now = state.now;

        let requeue = match state.events.get_mut(event) {
            Some(e) => {
                e.flags.remove(EventFlags::RUNNING);
                if e.flags.contains(EventFlags::CONTINUOUS) {
                    e.timestamp = now;
                    e.due = now + e.period;
                    e.callback = Some(callback);
                    true
                } else if e.flags.contains(EventFlags::REQUEUE) {
                    // A reschedule raced the run; its due stands as computed.
                    e.flags.remove(EventFlags::REQUEUE);
                    e.callback = Some(callback);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if let Some(d) = state.dispatchers.get_mut(dispatcher) {
            d.current = None;
            d.owner = None;
        }

        if requeue {
            // The dispatcher vanishing mid-run retires the event instead.
            if self.queue_locked(&mut state, event).is_err() {
                state.events.remove(event);
            }
        } else {
            state.events.remove(event);
        }

        let reap_auto = state
            .dispatchers
            .get(dispatcher)
            .is_some_and(|d| d.flags.contains(DispatcherFlags::AUTO) && d.is_idle());
        if reap_auto {
            state.dispatchers.remove(dispatcher);
        }
    }

    /// Earliest `due` across enabled dispatchers with pending work.
    fn next_due_locked(state: &ServiceState) -> Option<Ticks> {
        state
            .dispatchers
            .iter()
            .filter(|(_, d)| d.is_enabled() && !d.pending.is_empty())
            .filter_map(|(_, d)| state.events.get(d.pending[0]).map(|e| e.due))
            .min()
    }

    /// Blocks until the next event is due, readiness arrives, or `remaining` elapses.
    ///
    /// With a wait service attached the sleep happens inside the notifier backend so
    /// descriptor readiness and timers share one blocking point; otherwise the
    /// internal condvar is used. `will_awake` is published before sleeping so
    /// concurrent queuers know whether a wake is needed.
    fn wait_turn(&self, remaining: Ticks) -> RuntimeResult<()> {
        let waiter = self.waiter.get().and_then(Weak::upgrade);

        let mut state = self.lock();
        state.now = self.clock.now_ticks();
        let now = state.now;
        let delay = match Self::next_due_locked(&state) {
            Some(due) => (due - now).clamp(0, remaining),
            None => remaining,
        };
        if delay == 0 {
            return Ok(());
        }
        state.will_awake = now + delay;

        match waiter {
            Some(wait_service) => {
                drop(state);
                let outcome = wait_service.wait_for_io(self, delay);
                self.lock().will_awake = 0;
                outcome?;
            }
            None => {
                let (mut state, _timed_out) = self
                    .idle
                    .wait_timeout(state, Duration::from_millis(delay as u64))
                    .unwrap_or_else(PoisonError::into_inner);
                state.will_awake = 0;
            }
        }
        Ok(())
    }

    /// Wakes a sleeping service thread. Cheap and idempotent; callable from any
    /// thread.
    pub fn wake_service(&self) {
        self.idle.notify_all();
        if let Some(wake) = self.wake.get() {
            wake.wake();
        }
    }

    pub(crate) fn clock(&self) -> TickClock { self.clock }
}

impl std::fmt::Debug for EventService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventService")
            .field("queued_total", &self.queued_total())
            .finish_non_exhaustive()
    }
}
