// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! One registered interest in readiness on one descriptor. See [`WaitHandler`].

use super::mask::IoMask;
use crate::core::Handle;
use crate::event::{DispatcherHandle, EventHandle};
use bitflags::bitflags;
use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

/// Handle to a wait handler owned by the [`WaitService`] registry.
///
/// [`WaitService`]: super::WaitService
pub type WaitHandle = Handle<WaitHandler>;

bitflags! {
    /// Behavior flags for [`WaitHandler`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct HandlerFlags: u8 {
        /// The handler's owner buffers reads above the kernel: ask the service to
        /// re-fire the callback at the next turn without fresh kernel readiness.
        const RECALL         = 0b0000_0001;
        /// Invoke the callback synchronously on the service thread instead of
        /// queueing an I/O event.
        const IMMEDIATE      = 0b0000_0010;
        /// Queue each I/O event on a fresh auto-destroyed dispatcher rather than the
        /// handler's own.
        const NEW_DISPATCHER = 0b0000_0100;
    }
}

/// What a handler callback sees when readiness (or a recall) fires.
#[derive(Clone, Copy, Debug)]
pub struct IoContext {
    pub handler: WaitHandle,
    pub fd: RawFd,
    /// Observed readiness intersected with the handler's desired mask.
    pub mask: IoMask,
}

/// Callback invoked on readiness. Runs with no runtime lock held; it is responsible
/// for re-arming interest via [`WaitService::wait_on`] once it has consumed the
/// readiness.
///
/// [`WaitService::wait_on`]: super::WaitService::wait_on
pub type WaitProc = Box<dyn FnMut(&IoContext) + Send + 'static>;

/// Registration record for one `(fd, interest, dispatcher, callback)` quadruple.
///
/// While an I/O event is in flight for a handler, the backend carries **no** interest
/// bits for its fd: further readiness is suppressed until the callback re-arms. That
/// is what keeps a handler's callbacks from ever overlapping.
pub struct WaitHandler {
    pub(crate) fd: RawFd,
    /// What the owner currently wants to hear about.
    pub(crate) desired: IoMask,
    /// Last readiness observed for this handler.
    pub(crate) present: IoMask,
    /// Target dispatcher for queued I/O events; `None` means the process default.
    pub(crate) dispatcher: Option<DispatcherHandle>,
    /// Shared so a queued I/O event can reach the callback after the registry lock is
    /// released. Never contended: at most one I/O event is in flight per handler.
    pub(crate) callback: Arc<Mutex<WaitProc>>,
    pub(crate) flags: HandlerFlags,
    /// The in-flight I/O event, if any.
    pub(crate) pending_event: Option<EventHandle>,
}

impl WaitHandler {
    #[must_use]
    pub fn fd(&self) -> RawFd { self.fd }

    #[must_use]
    pub fn desired_mask(&self) -> IoMask { self.desired }
}

impl std::fmt::Debug for WaitHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitHandler")
            .field("fd", &self.fd)
            .field("desired", &self.desired)
            .field("present", &self.present)
            .field("flags", &self.flags)
            .field("pending_event", &self.pending_event)
            .finish_non_exhaustive()
    }
}
