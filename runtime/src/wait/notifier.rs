// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR eventfd kqueue

//! The backend seam: every host notification mechanism implements [`Notifier`], and the
//! wait service is generic over it. One backend is selected per process at build time
//! (see [`PlatformNotifier`]).

use super::mask::IoMask;
use crate::core::{RuntimeError, RuntimeResult, Ticks};
use smallvec::SmallVec;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Instant;

/// One ready descriptor reported by a backend wait.
#[derive(Clone, Copy, Debug)]
pub struct ReadyIo {
    pub fd: RawFd,
    /// Observed readiness, already translated to the abstract mask.
    pub mask: IoMask,
}

/// Ready descriptors from one backend wait. Sized for the common case of a handful of
/// simultaneously ready fds.
pub type ReadyList = SmallVec<[ReadyIo; 8]>;

/// Async-safe wake half of a backend.
///
/// `wake()` must be callable from a signal handler or any thread: a single atomic
/// latch test plus one write to the backend's wake channel. No locking, no allocation,
/// no logging. Wakes coalesce - concurrent calls while the latch is set are no-ops
/// until the waiting side clears it.
pub trait WakeSignal: Send + Sync + 'static {
    fn wake(&self);
}

/// A platform readiness-notification backend.
///
/// Implementations keep their interest bookkeeping behind an internal lock so `arm`
/// may be called from any thread while another is blocked in `wait` - the kernel-side
/// objects (epoll, kqueue) tolerate concurrent modification, and the poll-set backend
/// snapshots its registration set before blocking.
pub trait Notifier: Send + Sync + 'static {
    /// Idempotently updates the kernel's interest for `fd`. An empty mask fully
    /// unregisters the descriptor.
    ///
    /// # Errors
    ///
    /// [`OutOfRange`] when `fd` exceeds the backend capacity;
    /// [`PlatformFault`] when the host registration call fails.
    ///
    /// [`OutOfRange`]: RuntimeError::OutOfRange
    /// [`PlatformFault`]: RuntimeError::PlatformFault
    fn arm(&self, fd: RawFd, mask: IoMask) -> RuntimeResult<()>;

    /// Blocks up to `timeout` ms and returns the ready descriptors.
    ///
    /// Interrupted waits (`EINTR`) return an empty list - the caller's loop simply
    /// turns again. The wake channel is drained internally and never appears in the
    /// result; the wake latch is cleared before returning.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) on unexpected host failures.
    fn wait(&self, timeout: Ticks) -> RuntimeResult<ReadyList>;

    /// Shared handle to this backend's wake channel.
    fn wake_signal(&self) -> Arc<dyn WakeSignal>;
}

/// The backend compiled in for this host.
#[cfg(target_os = "linux")]
pub type PlatformNotifier = super::kernel_poll::KernelPollNotifier;

/// The backend compiled in for this host.
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub type PlatformNotifier = super::kernel_queue::KernelQueueNotifier;

/// The backend compiled in for this host.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "freebsd")))]
pub type PlatformNotifier = super::poll_set::PollSetNotifier;

/// Clamps a millisecond timeout into what `poll(2)`-family syscalls accept.
pub(crate) fn timeout_to_poll_ms(timeout: Ticks) -> i32 {
    timeout.clamp(0, i64::from(i32::MAX)) as i32
}

/// One-shot wait on a single descriptor, independent of any handler registry.
///
/// Returns the observed subset of `mask`, or an empty mask on timeout. Interrupted
/// waits retry with the remaining budget.
///
/// # Errors
///
/// [`PlatformFault`](RuntimeError::PlatformFault) if `poll(2)` fails.
pub fn wait_for_single_io(fd: RawFd, mask: IoMask, timeout: Ticks) -> RuntimeResult<IoMask> {
    let budget = crate::core::clamp_timeout(timeout, crate::core::MAX_TIMEOUT);
    let begin = Instant::now();

    loop {
        let elapsed = begin.elapsed().as_millis() as Ticks;
        let remaining = (budget - elapsed).max(0);
        let mut pollfd = libc::pollfd {
            fd,
            events: mask.to_poll_events(),
            revents: 0,
        };
        // Safety: pollfd points at one valid, initialized entry.
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_to_poll_ms(remaining)) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue; // Transient; retry with what is left of the budget.
            }
            return Err(RuntimeError::PlatformFault {
                op: "poll",
                source: err,
            });
        }
        if rc == 0 {
            return Ok(IoMask::empty());
        }
        return Ok(IoMask::from_poll_revents(pollfd.revents) & mask);
    }
}
