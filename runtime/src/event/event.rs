// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The unit of deferred work. See [`Event`] and [`EventFlags`].

use crate::core::{Handle, Ticks};
use crate::wait::IoMask;
use bitflags::bitflags;
use std::fmt;

/// Handle to an event owned by the [`EventService`] arena.
///
/// Stale after the event leaves every queue; all operations on a stale handle are
/// harmless no-ops or return [`NotFound`].
///
/// [`EventService`]: super::EventService
/// [`NotFound`]: crate::RuntimeError::NotFound
pub type EventHandle = Handle<Event>;

bitflags! {
    /// Behavior flags for [`Event`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EventFlags: u8 {
        /// Re-arm after each run with `due = now + period`.
        const CONTINUOUS = 0b0000_0001;
        /// When created without a dispatcher, bind to the non-blocking helper
        /// dispatcher instead of the process default.
        const QUICK      = 0b0000_0010;
        /// Initialize but do not queue; a later
        /// [`queue_event`](super::EventService::queue_event) arms it.
        const DONT_QUEUE = 0b0000_0100;
        /// Internal: the event sits in its dispatcher's current slot and its callback
        /// is executing.
        const RUNNING    = 0b0000_1000;
        /// Internal: re-queue once at the already-computed `due` when the current run
        /// finishes (set by a reschedule that raced a running callback).
        const REQUEUE    = 0b0001_0000;
    }
}

/// What a callback sees when its event fires.
#[derive(Clone, Copy, Debug)]
pub struct EventContext {
    /// The firing event. Valid for re-arm/remove calls from inside the callback.
    pub event: EventHandle,
    /// Readiness that produced this event. Empty for timer and plain events.
    pub mask: IoMask,
    /// Service tick at fire time.
    pub now: Ticks,
}

/// Callback invoked when an event fires. Runs on the service thread (or a worker that
/// has claimed the dispatcher) with no runtime lock held, so it may freely call back
/// into the runtime.
pub type EventProc = Box<dyn FnMut(&EventContext) + Send + 'static>;

/// A deferred or periodic unit of work bound to a dispatcher.
///
/// An event is always in exactly one place: unqueued (just created with
/// [`DONT_QUEUE`], or retired), its dispatcher's pending queue, or its dispatcher's
/// current slot while running. The callback is taken out of the event for the duration
/// of a run so no lock is held across user code.
///
/// [`DONT_QUEUE`]: EventFlags::DONT_QUEUE
pub struct Event {
    pub(crate) name: String,
    pub(crate) dispatcher: super::DispatcherHandle,
    /// Delay before first run and the re-arm interval for continuous events (ms).
    pub(crate) period: Ticks,
    /// Tick at creation (or last reschedule).
    pub(crate) timestamp: Ticks,
    /// Tick at which the event becomes eligible to run.
    pub(crate) due: Ticks,
    pub(crate) callback: Option<EventProc>,
    pub(crate) flags: EventFlags,
    /// Observed readiness for I/O events; empty otherwise.
    pub(crate) mask: IoMask,
    /// Whether the event currently sits in a pending queue.
    pub(crate) queued: bool,
}

impl Event {
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn period(&self) -> Ticks { self.period }

    #[must_use]
    pub fn due(&self) -> Ticks { self.due }

    #[must_use]
    pub fn is_continuous(&self) -> bool { self.flags.contains(EventFlags::CONTINUOUS) }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("due", &self.due)
            .field("flags", &self.flags)
            .field("queued", &self.queued)
            .finish_non_exhaustive()
    }
}
