// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR EPOLLERR EPOLLHUP EPOLLIN EPOLLOUT eventfd epfd

//! Linux kernel-poll backend over `epoll(7)` with an `eventfd(2)` wake channel. See
//! [`KernelPollNotifier`].

#![cfg(target_os = "linux")]

use super::mask::IoMask;
use super::notifier::{Notifier, ReadyIo, ReadyList, WakeSignal, timeout_to_poll_ms};
use crate::core::{RuntimeConfig, RuntimeError, RuntimeResult, Ticks, WakeLatch};
use rustc_hash::FxHashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Wake channel: an `eventfd` registered in the epoll set. Writing the mandatory
/// 8-byte counter increment unblocks an in-flight `epoll_wait`.
#[derive(Debug)]
pub struct EventFdWake {
    fd: OwnedFd,
    latch: WakeLatch,
}

impl WakeSignal for EventFdWake {
    fn wake(&self) {
        if self.latch.request() {
            let value: u64 = 1;
            // Safety: fd is a live eventfd; one non-blocking write, async-safe.
            unsafe {
                libc::write(
                    self.fd.as_raw_fd(),
                    std::ptr::from_ref(&value).cast(),
                    std::mem::size_of::<u64>(),
                )
            };
        }
    }
}

/// Level-triggered readiness via a long-lived epoll descriptor.
///
/// Interest changes go straight to the kernel (`epoll_ctl` is safe against a
/// concurrent `epoll_wait`), with a shadow map kept so re-arms can drop the previous
/// registration first.
#[derive(Debug)]
pub struct KernelPollNotifier {
    epoll: OwnedFd,
    wake: Arc<EventFdWake>,
    interest: Mutex<FxHashMap<RawFd, IoMask>>,
    max_events: usize,
}

impl KernelPollNotifier {
    /// Creates the epoll set and its eventfd wake channel.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) when either descriptor cannot
    /// be created or the wake channel cannot be registered.
    pub fn new(config: &RuntimeConfig) -> RuntimeResult<Self> {
        // Safety: plain syscalls; results checked before wrapping into OwnedFd.
        let epoll_raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_raw < 0 {
            return Err(RuntimeError::platform("epoll_create1"));
        }
        let epoll = unsafe { OwnedFd::from_raw_fd(epoll_raw) };

        let event_raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if event_raw < 0 {
            return Err(RuntimeError::platform("eventfd"));
        }
        let wake_fd = unsafe { OwnedFd::from_raw_fd(event_raw) };

        let mut registration = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) as u32,
            u64: wake_fd.as_raw_fd() as u64,
        };
        let rc = unsafe {
            libc::epoll_ctl(
                epoll.as_raw_fd(),
                libc::EPOLL_CTL_ADD,
                wake_fd.as_raw_fd(),
                &mut registration,
            )
        };
        if rc != 0 {
            return Err(RuntimeError::platform("epoll_ctl"));
        }

        Ok(Self {
            epoll,
            wake: Arc::new(EventFdWake {
                fd: wake_fd,
                latch: WakeLatch::new(),
            }),
            interest: Mutex::new(FxHashMap::default()),
            max_events: config.max_events.max(1),
        })
    }

    fn drain_wake(&self) {
        let mut counter: u64 = 0;
        // Safety: non-blocking read of the 8-byte eventfd counter.
        unsafe {
            libc::read(
                self.wake.fd.as_raw_fd(),
                std::ptr::from_mut(&mut counter).cast(),
                std::mem::size_of::<u64>(),
            )
        };
    }

    fn epoll_events_for(mask: IoMask) -> u32 {
        let mut events = 0;
        if mask.contains(IoMask::READABLE) {
            events |= (libc::EPOLLIN | libc::EPOLLHUP) as u32;
        }
        if mask.contains(IoMask::WRITABLE) {
            events |= (libc::EPOLLOUT | libc::EPOLLHUP) as u32;
        }
        events
    }
}

impl Notifier for KernelPollNotifier {
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

        // Drop the old registration, then add the new one. A delete can race a
        // concurrently closed descriptor; that is not an error worth surfacing.
        if !previous.is_empty() {
            let rc = unsafe {
                libc::epoll_ctl(
                    self.epoll.as_raw_fd(),
                    libc::EPOLL_CTL_DEL,
                    fd,
                    std::ptr::null_mut(),
                )
            };
            if rc != 0 {
                warn!(fd, "epoll delete failed: {}", std::io::Error::last_os_error());
            }
        }
        if !mask.is_empty() {
            let mut registration = libc::epoll_event {
                events: Self::epoll_events_for(mask),
                u64: fd as u64,
            };
            let rc = unsafe {
                libc::epoll_ctl(self.epoll.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut registration)
            };
            if rc != 0 {
                return Err(RuntimeError::platform("epoll_ctl"));
            }
            interest.insert(fd, mask);
        } else {
            interest.remove(&fd);
        }
        Ok(())
    }

    fn wait(&self, timeout: Ticks) -> RuntimeResult<ReadyList> {
        let mut events =
            vec![libc::epoll_event { events: 0, u64: 0 }; self.max_events];
        // Safety: the buffer is valid for max_events entries for the whole call.
        let count = unsafe {
            libc::epoll_wait(
                self.epoll.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_to_poll_ms(timeout),
            )
        };
        self.wake.latch.clear();

        if count < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(ReadyList::new()); // Transient; the service loop turns again.
            }
            return Err(RuntimeError::PlatformFault {
                op: "epoll_wait",
                source: err,
            });
        }

        let wake_fd = self.wake.fd.as_raw_fd();
        let mut ready = ReadyList::new();
        for event in events.iter().take(count as usize) {
            let fd = { event.u64 } as RawFd;
            if fd == wake_fd {
                self.drain_wake();
                continue;
            }
            let bits = { event.events } as i32;
            let mut mask = IoMask::empty();
            if bits & (libc::EPOLLIN | libc::EPOLLERR | libc::EPOLLHUP) != 0 {
                mask |= IoMask::READABLE;
            }
            if bits & (libc::EPOLLOUT | libc::EPOLLHUP) != 0 {
                mask |= IoMask::WRITABLE;
            }
            if !mask.is_empty() {
                ready.push(ReadyIo { fd, mask });
            }
        }
        Ok(ready)
    }

    fn wake_signal(&self) -> Arc<dyn WakeSignal> {
        let signal: Arc<dyn WakeSignal> = self.wake.clone();
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::tests::pipe_pair;

    fn notifier() -> KernelPollNotifier {
        KernelPollNotifier::new(&RuntimeConfig::default()).unwrap()
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
    fn wake_coalesces_until_wait_clears_the_latch() {
        let backend = notifier();
        let wake = backend.wake_signal();
        wake.wake();
        wake.wake();
        wake.wake();
        assert!(backend.wait(1_000).unwrap().is_empty());
        // Latch cleared by the wait; the next wake must land again.
        wake.wake();
        assert!(backend.wait(1_000).unwrap().is_empty());
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
    fn closed_write_end_reports_readable_for_eof() {
        let backend = notifier();
        let (read_fd, write_fd) = pipe_pair();
        backend.arm(read_fd.fd(), IoMask::READABLE).unwrap();
        drop(write_fd); // HUP folds into READABLE so the callback can observe EOF.

        let ready = backend.wait(1_000).unwrap();
        assert_eq!(ready.len(), 1);
        assert!(ready[0].mask.contains(IoMask::READABLE));
    }

    #[test]
    fn re_arm_replaces_interest() {
        let backend = notifier();
        let (read_fd, write_fd) = pipe_pair();
        backend.arm(read_fd.fd(), IoMask::READABLE).unwrap();
        backend.arm(read_fd.fd(), IoMask::empty()).unwrap();
        write_fd.write_byte(b'x');
        assert!(backend.wait(50).unwrap().is_empty());

        backend.arm(read_fd.fd(), IoMask::READABLE).unwrap();
        assert_eq!(backend.wait(1_000).unwrap().len(), 1);
    }
}
