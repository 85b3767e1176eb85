// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR EVFILT kevent kqueue fflags udata

//! BSD/macOS kernel-queue backend over `kqueue(2)` with an `EVFILT_USER` wake event.
//! See [`KernelQueueNotifier`].

#![cfg(any(target_os = "macos", target_os = "freebsd"))]

use super::mask::IoMask;
use super::notifier::{Notifier, ReadyIo, ReadyList, WakeSignal};
use crate::core::{RuntimeConfig, RuntimeError, RuntimeResult, Ticks, WakeLatch};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Identifier of the user-filter wake event within the queue.
const WAKE_IDENT: libc::uintptr_t = 0;

/// Builds a `kevent` change record. The struct layout differs across the BSDs, so
/// start from zeroed memory and fill the fields every variant shares.
fn change(ident: libc::uintptr_t, filter: i16, flags: u16, fflags: u32) -> libc::kevent {
    // Safety: kevent is plain old data; all-zero is a valid value.
    let mut event: libc::kevent = unsafe { std::mem::zeroed() };
    event.ident = ident;
    event.filter = filter;
    event.flags = flags;
    event.fflags = fflags;
    event
}

fn apply(kq: RawFd, changes: &[libc::kevent]) -> i32 {
    // Safety: `changes` is a valid, initialized slice for the whole call.
    unsafe {
        libc::kevent(
            kq,
            changes.as_ptr(),
            changes.len() as i32,
            std::ptr::null_mut(),
            0,
            std::ptr::null(),
        )
    }
}

/// Wake channel: triggering the pre-registered `EVFILT_USER` event unblocks an
/// in-flight `kevent` wait. The queue descriptor lives here so the wake handle can
/// outlive backend reconfiguration.
#[derive(Debug)]
pub struct KernelQueueWake {
    kq: OwnedFd,
    latch: WakeLatch,
}

impl WakeSignal for KernelQueueWake {
    fn wake(&self) {
        if self.latch.request() {
            let trigger = change(WAKE_IDENT, libc::EVFILT_USER, 0, libc::NOTE_TRIGGER);
            apply(self.kq.as_raw_fd(), &[trigger]);
        }
    }
}

/// Readiness via per-filter kqueue registrations (`EVFILT_READ` / `EVFILT_WRITE`).
///
/// Interest changes are expressed as kernel change lists: the previous filter is
/// deleted and the new one added in a single `kevent` call. `kevent` registration is
/// safe against a concurrent blocking wait on the same queue.
#[derive(Debug)]
pub struct KernelQueueNotifier {
    wake: Arc<KernelQueueWake>,
    interest: Mutex<FxHashMap<RawFd, IoMask>>,
    max_events: usize,
}

impl KernelQueueNotifier {
    /// Creates the queue and registers the user-filter wake event.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) when the queue cannot be
    /// created or the wake event cannot be registered.
    pub fn new(config: &RuntimeConfig) -> RuntimeResult<Self> {
        // Safety: plain syscall; result checked before wrapping into OwnedFd.
        let kq_raw = unsafe { libc::kqueue() };
        if kq_raw < 0 {
            return Err(RuntimeError::platform("kqueue"));
        }
        let kq = unsafe { OwnedFd::from_raw_fd(kq_raw) };

        let register = change(
            WAKE_IDENT,
            libc::EVFILT_USER,
            libc::EV_ADD | libc::EV_CLEAR,
            0,
        );
        if apply(kq.as_raw_fd(), &[register]) < 0 {
            return Err(RuntimeError::platform("kevent"));
        }

        Ok(Self {
            wake: Arc::new(KernelQueueWake {
                kq,
                latch: WakeLatch::new(),
            }),
            interest: Mutex::new(FxHashMap::default()),
            max_events: config.max_events.max(1),
        })
    }
}

impl Notifier for KernelQueueNotifier {
    fn arm(&self, fd: RawFd, mask: IoMask) -> RuntimeResult<()> {
        if fd < 0 {
            return Err(RuntimeError::InvalidArgument {
                reason: "negative file descriptor",
            });
        }
        let mut interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = interest.get(&fd).copied().unwrap_or_default();
        if previous == mask {
            return Ok(());
        }

        let ident = fd as libc::uintptr_t;
        let mut changes: SmallVec<[libc::kevent; 4]> = SmallVec::new();
        if previous.contains(IoMask::READABLE) && !mask.contains(IoMask::READABLE) {
            changes.push(change(ident, libc::EVFILT_READ, libc::EV_DELETE, 0));
        }
        if previous.contains(IoMask::WRITABLE) && !mask.contains(IoMask::WRITABLE) {
            changes.push(change(ident, libc::EVFILT_WRITE, libc::EV_DELETE, 0));
        }
        if mask.contains(IoMask::READABLE) && !previous.contains(IoMask::READABLE) {
            changes.push(change(ident, libc::EVFILT_READ, libc::EV_ADD, 0));
        }
        if mask.contains(IoMask::WRITABLE) && !previous.contains(IoMask::WRITABLE) {
            changes.push(change(ident, libc::EVFILT_WRITE, libc::EV_ADD, 0));
        }

        if !changes.is_empty() && apply(self.wake.kq.as_raw_fd(), &changes) < 0 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                // The peer of a registered pipe vanished between readiness and
                // re-registration; the next wait reports EOF instead.
                Some(libc::EPIPE) => debug!(fd, "kqueue re-registration raced a broken pipe"),
                Some(libc::ENOENT) if mask.is_empty() => {
                    // Deleting an already-gone filter is a no-op.
                }
                _ => {
                    warn!(fd, "kevent registration failed: {err}");
                    return Err(RuntimeError::PlatformFault {
                        op: "kevent",
                        source: err,
                    });
                }
            }
        }
        if mask.is_empty() {
            interest.remove(&fd);
        } else {
            interest.insert(fd, mask);
        }
        Ok(())
    }

    fn wait(&self, timeout: Ticks) -> RuntimeResult<ReadyList> {
        let timeout = timeout.max(0);
        let timespec = libc::timespec {
            tv_sec: (timeout / 1_000) as libc::time_t,
            tv_nsec: ((timeout % 1_000) * 1_000_000) as libc::c_long,
        };
        // Safety: zeroed kevent records are valid; the buffer outlives the call.
        let mut events: Vec<libc::kevent> =
            vec![unsafe { std::mem::zeroed() }; self.max_events];
        let count = unsafe {
            libc::kevent(
                self.wake.kq.as_raw_fd(),
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as i32,
                &timespec,
            )
        };
        self.wake.latch.clear();

        if count < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(ReadyList::new()); // Transient; the service loop turns again.
            }
            return Err(RuntimeError::PlatformFault {
                op: "kevent",
                source: err,
            });
        }

        let mut ready = ReadyList::new();
        for event in events.iter().take(count as usize) {
            if event.filter == libc::EVFILT_USER {
                continue;
            }
            let fd = event.ident as RawFd;
            let mut mask = IoMask::empty();
            if event.flags & libc::EV_ERROR != 0 {
                match event.data as i32 {
                    // Descriptor closed under us: report readable so the handler's
                    // callback observes EOF on its next read.
                    libc::EBADF | libc::EINVAL => mask |= IoMask::READABLE,
                    _ => {}
                }
            }
            if event.filter == libc::EVFILT_READ {
                mask |= IoMask::READABLE;
            }
            if event.filter == libc::EVFILT_WRITE {
                mask |= IoMask::WRITABLE;
            }
            if !mask.is_empty() {
                ready.push(ReadyIo { fd, mask });
            }
        }
        Ok(ready)
    }

    fn wake_signal(&self) -> Arc<dyn WakeSignal> { Arc::clone(&self.wake) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::tests::pipe_pair;

    fn notifier() -> KernelQueueNotifier {
        KernelQueueNotifier::new(&RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn wake_interrupts_a_long_wait() {
        let backend = notifier();
        let wake = backend.wake_signal();

        let begin = std::time::Instant::now();
        wake.wake();
        let ready = backend.wait(5_000).unwrap();
        assert!(ready.is_empty(), "wake channel must not surface as readiness");
        assert!(begin.elapsed().as_millis() < 1_000, "wake did not interrupt");
    }

    #[test]
    fn armed_pipe_reports_readable() {
        let backend = notifier();
        let (read_fd, write_fd) = pipe_pair();
        backend.arm(read_fd.fd(), IoMask::READABLE).unwrap();
        write_fd.write_byte(b'x');

        let ready = backend.wait(1_000).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].fd, read_fd.fd());
        assert!(ready[0].mask.contains(IoMask::READABLE));
    }

    #[test]
    fn disarm_removes_registration() {
        let backend = notifier();
        let (read_fd, write_fd) = pipe_pair();
        backend.arm(read_fd.fd(), IoMask::READABLE).unwrap();
        backend.arm(read_fd.fd(), IoMask::empty()).unwrap();
        write_fd.write_byte(b'x');

        let ready = backend.wait(50).unwrap();
        assert!(ready.is_empty());
    }
}
