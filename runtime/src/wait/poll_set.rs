// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EINTR pollfd pollfds

//! Level-triggered `poll(2)` backend - the portable fallback for hosts without a
//! kernel queue. See [`PollSetNotifier`].

use super::mask::IoMask;
use super::notifier::{Notifier, ReadyIo, ReadyList, WakeSignal, timeout_to_poll_ms};
use crate::core::{RuntimeConfig, RuntimeError, RuntimeResult, Ticks, WakeLatch};
use rustc_hash::FxHashMap;
use std::net::UdpSocket;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{trace, warn};

/// How many consecutive ports the wake-channel scan tries before giving up and asking
/// the OS for an ephemeral one.
const WAKE_PORT_ATTEMPTS: u16 = 100;

/// Wake channel: a UDP socket bound to localhost and connected to itself. One
/// datagram unblocks a `poll` that includes the socket; the latch coalesces
/// concurrent wakes.
#[derive(Debug)]
pub struct PollSetWake {
    socket: UdpSocket,
    latch: WakeLatch,
}

impl WakeSignal for PollSetWake {
    fn wake(&self) {
        if self.latch.request() {
            // One sendto syscall on a pre-connected socket: async-safe.
            drop(self.socket.send(&[1]));
        }
    }
}

/// Registration set for the `poll(2)` backend, rebuilt into a `pollfd` array before
/// each wait.
///
/// The interest map lives behind its own lock so `arm` from any thread lands in the
/// snapshot taken by the next wait; the blocking `poll` itself runs unlocked, and the
/// wake channel interrupts it when registrations must take effect sooner.
#[derive(Debug)]
pub struct PollSetNotifier {
    interest: Mutex<FxHashMap<RawFd, IoMask>>,
    wake: Arc<PollSetWake>,
    max_fd: RawFd,
}

impl PollSetNotifier {
    /// Opens the wake channel and an empty registration set.
    ///
    /// The wake port scan starts at `config.wakeup_port` and walks upward; when every
    /// candidate is taken the OS picks an ephemeral port instead.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) when no wake socket can be
    /// bound at all.
    pub fn new(config: &RuntimeConfig) -> RuntimeResult<Self> {
        let socket = bind_wake_socket(config.wakeup_port)?;
        socket
            .set_nonblocking(true)
            .map_err(|source| RuntimeError::PlatformFault {
                op: "set_nonblocking",
                source,
            })?;
        let local = socket
            .local_addr()
            .map_err(|source| RuntimeError::PlatformFault {
                op: "local_addr",
                source,
            })?;
        socket
            .connect(local)
            .map_err(|source| RuntimeError::PlatformFault {
                op: "connect",
                source,
            })?;
        trace!(%local, "poll-set wake channel bound");

        Ok(Self {
            interest: Mutex::new(FxHashMap::default()),
            wake: Arc::new(PollSetWake {
                socket,
                latch: WakeLatch::new(),
            }),
            max_fd: config.max_fd,
        })
    }

    fn drain_wake(&self) {
        let mut buffer = [0u8; 128];
        while self.wake.socket.recv(&mut buffer).is_ok() {}
    }
}

fn bind_wake_socket(start_port: u16) -> RuntimeResult<UdpSocket> {
    for attempt in 0..WAKE_PORT_ATTEMPTS {
        let port = start_port.wrapping_add(attempt);
        if let Ok(socket) = UdpSocket::bind(("127.0.0.1", port)) {
            return Ok(socket);
        }
    }
    // Every candidate in the scan range is taken; an OS-assigned port works just as
    // well since the socket only ever talks to itself.
    UdpSocket::bind(("127.0.0.1", 0)).map_err(|source| {
        warn!(start_port, "wake port scan exhausted and ephemeral bind failed");
        RuntimeError::PlatformFault {
            op: "bind",
            source,
        }
    })
}

impl Notifier for PollSetNotifier {
    fn arm(&self, fd: RawFd, mask: IoMask) -> RuntimeResult<()> {
        if fd < 0 {
            return Err(RuntimeError::InvalidArgument {
                reason: "negative file descriptor",
            });
        }
        if fd >= self.max_fd {
            return Err(RuntimeError::OutOfRange {
                reason: "fd exceeds poll-set capacity",
            });
        }
        let mut interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
        if mask.is_empty() {
            interest.remove(&fd);
        } else {
            interest.insert(fd, mask);
        }
        drop(interest);
        // Make the new registration visible to an in-flight wait.
        self.wake.wake();
        Ok(())
    }

    fn wait(&self, timeout: Ticks) -> RuntimeResult<ReadyList> {
        let mut pollfds: Vec<libc::pollfd> = Vec::new();
        pollfds.push(libc::pollfd {
            fd: self.wake.socket.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        {
            let interest = self.interest.lock().unwrap_or_else(PoisonError::into_inner);
            pollfds.extend(interest.iter().map(|(&fd, &mask)| libc::pollfd {
                fd,
                events: mask.to_poll_events(),
                revents: 0,
            }));
        }

        // Safety: the vec holds initialized pollfd entries for the whole call.
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_to_poll_ms(timeout),
            )
        };
        self.wake.latch.clear();

        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(ReadyList::new()); // Transient; the service loop turns again.
            }
            return Err(RuntimeError::PlatformFault {
                op: "poll",
                source: err,
            });
        }

        let mut ready = ReadyList::new();
        if rc == 0 {
            return Ok(ready);
        }
        for (index, pollfd) in pollfds.iter().enumerate() {
            if pollfd.revents == 0 {
                continue;
            }
            if index == 0 {
                self.drain_wake();
                continue;
            }
            let mask = IoMask::from_poll_revents(pollfd.revents);
            if !mask.is_empty() {
                ready.push(ReadyIo {
                    fd: pollfd.fd,
                    mask,
                });
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

    fn notifier() -> PollSetNotifier {
        PollSetNotifier::new(&RuntimeConfig::default()).unwrap()
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

    #[test]
    fn oversized_fd_is_rejected() {
        let backend = notifier();
        let err = backend.arm(backend.max_fd + 1, IoMask::READABLE).unwrap_err();
        assert!(matches!(err, RuntimeError::OutOfRange { .. }));
    }
}
