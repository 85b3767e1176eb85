// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Ordered event queue with at-most-one-in-flight execution. See [`Dispatcher`].

use super::event::EventHandle;
use crate::core::Handle;
use bitflags::bitflags;
use std::thread::ThreadId;

/// Handle to a dispatcher owned by the [`EventService`] arena.
///
/// [`EventService`]: super::EventService
pub type DispatcherHandle = Handle<Dispatcher>;

bitflags! {
    /// Behavior flags for [`Dispatcher`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DispatcherFlags: u8 {
        /// Eligible for scheduling. Dispatchers are born enabled.
        const ENABLED   = 0b0000_0001;
        /// Destroy automatically once the queue drains and no event is in flight.
        /// Used for per-event I/O dispatchers.
        const AUTO      = 0b0000_0010;
        /// Internal: tear-down has begun; no further events may be queued.
        const DESTROYED = 0b0000_0100;
    }
}

/// An ordered queue of pending events plus a single in-flight slot.
///
/// Two invariants hold at all times:
///
/// 1. `pending` is non-decreasing by `due`; equal-due events keep insertion order, so
///    simultaneous deadlines fire first-in-first-out.
/// 2. At most one thread executes this dispatcher's events at a time. The claiming
///    thread records itself in `owner`; any other service thread scanning for work
///    skips an owned dispatcher.
#[derive(Debug)]
pub struct Dispatcher {
    pub(crate) name: String,
    pub(crate) flags: DispatcherFlags,
    /// Thread currently draining this dispatcher, if any.
    pub(crate) owner: Option<ThreadId>,
    /// Pending events, ascending by `due` (ties in insertion order).
    pub(crate) pending: Vec<EventHandle>,
    /// The event whose callback is executing right now.
    pub(crate) current: Option<EventHandle>,
}

impl Dispatcher {
    pub(crate) fn new(name: &str, flags: DispatcherFlags) -> Self {
        Self {
            name: name.to_string(),
            flags: flags | DispatcherFlags::ENABLED,
            owner: None,
            pending: Vec::new(),
            current: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags.contains(DispatcherFlags::ENABLED)
            && !self.flags.contains(DispatcherFlags::DESTROYED)
    }

    /// No pending events and nothing in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool { self.pending.is_empty() && self.current.is_none() }

    /// Whether this dispatcher can be handed to a scanning service thread.
    pub(crate) fn claimable(&self) -> bool {
        self.is_enabled() && self.owner.is_none() && !self.pending.is_empty()
    }

    /// Drops `event` from the pending queue if present. Returns whether it was there.
    pub(crate) fn unlink(&mut self, event: EventHandle) -> bool {
        match self.pending.iter().position(|&h| h == event) {
            Some(at) => {
                self.pending.remove(at);
                true
            }
            None => false,
        }
    }
}
