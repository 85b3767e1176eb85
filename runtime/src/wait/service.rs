// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Backend-agnostic wait service: handler registry, readiness-to-event plumbing, the
//! recall protocol, and the cross-thread wake channel. See [`WaitService`].

use super::handler::{HandlerFlags, IoContext, WaitHandle, WaitHandler, WaitProc};
use super::mask::IoMask;
use super::notifier::{Notifier, PlatformNotifier, ReadyList, WakeSignal};
use crate::core::{Arena, RuntimeConfig, RuntimeError, RuntimeResult, Ticks};
use crate::event::{
    DispatcherFlags, DispatcherHandle, EventContext, EventFlags, EventProc, EventService,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{trace, warn};

struct WaitState {
    handlers: Arena<WaitHandler>,
    fd_map: FxHashMap<RawFd, WaitHandle>,
}

/// Owns the handler registry and the platform notifier; translates kernel readiness
/// into I/O events on the owning handlers' dispatchers.
///
/// Lock order is `wait state -> event service state`; the notifier's interest lock is
/// a leaf taken under the wait state lock. The event service never calls back into
/// this service except through the lock-free wake signal, so the order cannot invert.
pub struct WaitService {
    /// The engine I/O events are queued on. Weak: the runtime owns both services.
    events: Weak<EventService>,
    self_weak: Weak<WaitService>,
    state: Mutex<WaitState>,
    notifier: PlatformNotifier,
    wake: Arc<dyn WakeSignal>,
    /// Set when any handler requests a recall; consumed at the top of the next wait
    /// turn.
    need_recall: AtomicBool,
    config: RuntimeConfig,
}

impl WaitService {
    /// Builds the service over the platform backend and wires it into `events` so the
    /// service loop sleeps inside the notifier.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) when the backend cannot be
    /// created.
    pub fn new(events: &Arc<EventService>, config: &RuntimeConfig) -> RuntimeResult<Arc<Self>> {
        let notifier = PlatformNotifier::new(config)?;
        let wake = notifier.wake_signal();
        let service = Arc::new_cyclic(|self_weak| Self {
            events: Arc::downgrade(events),
            self_weak: self_weak.clone(),
            state: Mutex::new(WaitState {
                handlers: Arena::new(),
                fd_map: FxHashMap::default(),
            }),
            notifier,
            wake: Arc::clone(&wake),
            need_recall: AtomicBool::new(false),
            config: config.clone(),
        });
        events.attach_waiter(&service, wake);
        Ok(service)
    }

    fn lock(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn event_service(&self) -> RuntimeResult<Arc<EventService>> {
        self.events.upgrade().ok_or(RuntimeError::InvalidState {
            reason: "event service is gone",
        })
    }

    /// Shared handle to the backend's async-safe wake channel.
    #[must_use]
    pub fn wake_signal(&self) -> Arc<dyn WakeSignal> { Arc::clone(&self.wake) }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize { self.lock().handlers.len() }

    /// Registers interest in readiness on `fd`.
    ///
    /// `dispatcher: None` queues I/O events on the process-default dispatcher. An
    /// empty `mask` registers the handler without arming it; arm later with
    /// [`wait_on`](Self::wait_on).
    ///
    /// # Errors
    ///
    /// - [`InvalidArgument`] for a negative or already-registered fd.
    /// - [`OutOfRange`] when `fd` or the handler count exceeds the backend capacity.
    /// - [`PlatformFault`] when the backend refuses the registration.
    ///
    /// [`InvalidArgument`]: RuntimeError::InvalidArgument
    /// [`OutOfRange`]: RuntimeError::OutOfRange
    /// [`PlatformFault`]: RuntimeError::PlatformFault
    pub fn create_handler(
        &self,
        fd: RawFd,
        mask: IoMask,
        dispatcher: Option<DispatcherHandle>,
        callback: WaitProc,
        flags: HandlerFlags,
    ) -> RuntimeResult<WaitHandle> {
        if fd < 0 {
            return Err(RuntimeError::InvalidArgument {
                reason: "negative file descriptor",
            });
        }
        if fd >= self.config.max_fd {
            return Err(RuntimeError::OutOfRange {
                reason: "fd exceeds backend capacity",
            });
        }
        let mut state = self.lock();
        if state.handlers.len() >= self.config.max_fd as usize {
            return Err(RuntimeError::OutOfRange {
                reason: "too many wait handlers",
            });
        }
        if state.fd_map.contains_key(&fd) {
            return Err(RuntimeError::InvalidArgument {
                reason: "fd already has a wait handler",
            });
        }
        let handle = state.handlers.insert(WaitHandler {
            fd,
            desired: IoMask::empty(),
            present: IoMask::empty(),
            dispatcher,
            callback: Arc::new(Mutex::new(callback)),
            flags,
            pending_event: None,
        });
        state.fd_map.insert(fd, handle);
        if !mask.is_empty() {
            if let Err(err) = self.notify_on_locked(&mut state, handle, mask) {
                state.handlers.remove(handle);
                state.fd_map.remove(&fd);
                return Err(err);
            }
        }
        trace!(fd, ?handle, ?mask, "wait handler created");
        Ok(handle)
    }

    /// Updates the handler's desired mask. An empty mask disarms the backend
    /// registration but keeps the handler alive.
    ///
    /// # Errors
    ///
    /// [`NotFound`] for a stale handle; [`PlatformFault`] from the backend.
    ///
    /// [`NotFound`]: RuntimeError::NotFound
    /// [`PlatformFault`]: RuntimeError::PlatformFault
    pub fn wait_on(&self, handle: WaitHandle, mask: IoMask) -> RuntimeResult<()> {
        let mut state = self.lock();
        let handler = state.handlers.get(handle).ok_or(RuntimeError::NotFound)?;
        if handler.desired == mask {
            return Ok(());
        }
        if handler.flags.contains(HandlerFlags::RECALL) {
            self.need_recall.store(true, Ordering::SeqCst);
        }
        self.notify_on_locked(&mut state, handle, mask)
    }

    /// Removes a handler: disarms the backend, unregisters the fd, and cancels any
    /// queued I/O event. Idempotent - a second call on the same handle is a no-op.
    pub fn remove_handler(&self, handle: WaitHandle) {
        let mut state = self.lock();
        let Some(handler) = state.handlers.get(handle) else {
            return;
        };
        let fd = handler.fd;
        let desired = handler.desired;
        if !desired.is_empty()
            && let Err(err) = self.notifier.arm(fd, IoMask::empty())
        {
            warn!(fd, "disarm on handler removal failed: {err}");
        }
        let pending = state
            .handlers
            .get_mut(handle)
            .and_then(|h| h.pending_event.take());
        state.fd_map.remove(&fd);
        state.handlers.remove(handle);
        drop(state);
        if let (Some(event), Ok(events)) = (pending, self.event_service()) {
            events.remove_event(event);
        }
        trace!(fd, ?handle, "wait handler removed");
    }

    /// Marks a handler for an out-of-band callback at the next service turn, for
    /// owners that buffer data above the kernel. Wakes the service.
    pub fn recall_handler(&self, handle: WaitHandle) {
        let mut state = self.lock();
        if let Some(handler) = state.handlers.get_mut(handle) {
            handler.flags.insert(HandlerFlags::RECALL);
            self.need_recall.store(true, Ordering::SeqCst);
        }
        drop(state);
        self.wake_event_service();
    }

    /// [`recall_handler`](Self::recall_handler) addressed by descriptor.
    pub fn recall_handler_by_fd(&self, fd: RawFd) {
        let mut state = self.lock();
        let handle = state.fd_map.get(&fd).copied();
        if let Some(handle) = handle
            && let Some(handler) = state.handlers.get_mut(handle)
        {
            handler.flags.insert(HandlerFlags::RECALL);
            self.need_recall.store(true, Ordering::SeqCst);
        }
        drop(state);
        self.wake_event_service();
    }

    fn wake_event_service(&self) {
        if let Some(events) = self.events.upgrade() {
            events.wake_service();
        } else {
            self.wake.wake();
        }
    }

    /// One blocking turn: service recalls if any are due, otherwise block in the
    /// backend up to `timeout` ms and fan observed readiness out to handlers. Called
    /// by the event service loop.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) from the backend wait.
    pub fn wait_for_io(&self, events: &EventService, timeout: Ticks) -> RuntimeResult<()> {
        let timeout = self.config.cap_wait_timeout(timeout);
        if self.need_recall.swap(false, Ordering::SeqCst) {
            self.do_recall(events);
            return Ok(());
        }
        let ready = self.notifier.wait(timeout)?;
        if !ready.is_empty() {
            self.service_io(events, &ready);
        }
        Ok(())
    }

    /// Fans ready descriptors out to their handlers: suppress-then-queue for normal
    /// handlers, synchronous invocation for immediate ones.
    fn service_io(&self, events: &EventService, ready: &ReadyList) {
        let mut immediate: SmallVec<[(Arc<Mutex<WaitProc>>, IoContext); 4]> = SmallVec::new();
        let mut state = self.lock();
        for io in ready {
            let Some(&handle) = state.fd_map.get(&io.fd) else {
                trace!(fd = io.fd, "readiness for fd without handler");
                continue;
            };
            let Some(handler) = state.handlers.get_mut(handle) else {
                continue;
            };
            let present = io.mask & handler.desired;
            if present.is_empty() {
                continue;
            }
            handler.present = present;

            if handler.flags.contains(HandlerFlags::IMMEDIATE) {
                immediate.push((
                    Arc::clone(&handler.callback),
                    IoContext {
                        handler: handle,
                        fd: io.fd,
                        mask: present,
                    },
                ));
                continue;
            }
            // Suppress further readiness while the event is in flight; the callback
            // re-arms via wait_on once it has consumed this readiness.
            if let Err(err) = self.notify_on_locked(&mut state, handle, IoMask::empty()) {
                warn!(fd = io.fd, "suppress failed: {err}");
                continue;
            }
            if let Err(err) = self.queue_io_locked(&mut state, events, handle, present) {
                warn!(fd = io.fd, "I/O event queue failed: {err}");
            }
        }
        drop(state);

        for (callback, context) in immediate {
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (callback)(&context);
        }
    }

    /// Synthesizes ready-readable notifications for recall-flagged handlers through
    /// the same suppress-and-queue path kernel readiness takes.
    fn do_recall(&self, events: &EventService) {
        let mut state = self.lock();
        for handle in state.handlers.handles() {
            let Some(handler) = state.handlers.get_mut(handle) else {
                continue;
            };
            if !handler.flags.contains(HandlerFlags::RECALL)
                || !handler.desired.contains(IoMask::READABLE)
            {
                continue;
            }
            handler.flags.remove(HandlerFlags::RECALL);
            handler.present = IoMask::READABLE;
            let fd = handler.fd;
            if let Err(err) = self.notify_on_locked(&mut state, handle, IoMask::empty()) {
                warn!(fd, "recall suppress failed: {err}");
                continue;
            }
            if let Err(err) = self.queue_io_locked(&mut state, events, handle, IoMask::READABLE) {
                warn!(fd, "recall queue failed: {err}");
            }
        }
    }

    /// Re-arms the backend for `handle` and cancels any in-flight I/O event - a mask
    /// change invalidates readiness observed under the old mask.
    fn notify_on_locked(
        &self,
        state: &mut WaitState,
        handle: WaitHandle,
        mask: IoMask,
    ) -> RuntimeResult<()> {
        let handler = state.handlers.get_mut(handle).ok_or(RuntimeError::NotFound)?;
        if handler.desired == mask {
            return Ok(());
        }
        self.notifier.arm(handler.fd, mask)?;
        handler.desired = mask;
        if let Some(event) = handler.pending_event.take()
            && let Some(events) = self.events.upgrade()
        {
            events.remove_event(event);
        }
        Ok(())
    }

    /// Queues an I/O event carrying `present` on the handler's dispatcher (or a fresh
    /// auto dispatcher, or the process default).
    fn queue_io_locked(
        &self,
        state: &mut WaitState,
        events: &EventService,
        handle: WaitHandle,
        present: IoMask,
    ) -> RuntimeResult<()> {
        let handler = state.handlers.get(handle).ok_or(RuntimeError::NotFound)?;
        let dispatcher = if handler.flags.contains(HandlerFlags::NEW_DISPATCHER) {
            Some(events.create_dispatcher("io", DispatcherFlags::AUTO))
        } else {
            handler.dispatcher
        };

        let service = self.self_weak.clone();
        let callback: EventProc = Box::new(move |context: &EventContext| {
            if let Some(service) = service.upgrade() {
                service.run_io_callback(handle, context.mask);
            }
        });
        let event = events.create_event_with_mask(
            dispatcher,
            "io-event",
            0,
            callback,
            EventFlags::DONT_QUEUE,
            present,
        )?;
        if let Some(handler) = state.handlers.get_mut(handle) {
            handler.pending_event = Some(event);
        }
        events.queue_event(event)
    }

    /// Runs a handler's callback from its queued I/O event. The in-flight marker is
    /// cleared first so the callback may immediately re-arm.
    fn run_io_callback(&self, handle: WaitHandle, mask: IoMask) {
        let claimed = {
            let mut state = self.lock();
            state.handlers.get_mut(handle).map(|handler| {
                handler.pending_event = None;
                (
                    Arc::clone(&handler.callback),
                    IoContext {
                        handler: handle,
                        fd: handler.fd,
                        mask,
                    },
                )
            })
        };
        if let Some((callback, context)) = claimed {
            let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (callback)(&context);
        }
    }
}

impl std::fmt::Debug for WaitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitService")
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}
