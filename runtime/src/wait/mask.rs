// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words EPOLLERR EPOLLHUP EPOLLIN EPOLLOUT POLLERR POLLHUP POLLIN POLLNVAL POLLOUT

//! Abstract readiness bits shared by every notifier backend. See [`IoMask`].

use bitflags::bitflags;

bitflags! {
    /// Direction(s) of I/O readiness a handler is interested in, or that a backend
    /// observed.
    ///
    /// The two abstract bits deliberately subsume the richer host-level conditions so
    /// handlers stay backend-blind:
    ///
    /// - [`READABLE`] covers data-available, peer-close, hang-up, error, and
    ///   new-connection on listening sockets. A closed descriptor that surfaces as an
    ///   error is reported as readable so the callback can observe EOF on its next
    ///   read.
    /// - [`WRITABLE`] covers writable and connection-completed.
    ///
    /// Each backend translates to and from its host representation (`EPOLLIN`/
    /// `EPOLLOUT`, `EVFILT_READ`/`EVFILT_WRITE`, `POLLIN`/`POLLOUT`).
    ///
    /// [`READABLE`]: Self::READABLE
    /// [`WRITABLE`]: Self::WRITABLE
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct IoMask: u8 {
        const READABLE = 0b01;
        const WRITABLE = 0b10;
    }
}

impl IoMask {
    /// Translates `poll(2)` revents bits. `POLLHUP`/`POLLERR`/`POLLNVAL` fold into
    /// readable so EOF and error conditions reach the callback.
    #[must_use]
    pub fn from_poll_revents(revents: i16) -> Self {
        let mut mask = Self::empty();
        if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            mask |= Self::READABLE;
        }
        if revents & libc::POLLOUT != 0 {
            mask |= Self::WRITABLE;
        }
        mask
    }

    /// Builds `poll(2)` events bits for this interest mask.
    #[must_use]
    pub fn to_poll_events(self) -> i16 {
        let mut events = 0;
        if self.contains(Self::READABLE) {
            events |= libc::POLLIN | libc::POLLHUP;
        }
        if self.contains(Self::WRITABLE) {
            events |= libc::POLLOUT;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hangup_and_error_fold_into_readable() {
        assert_eq!(IoMask::from_poll_revents(libc::POLLHUP), IoMask::READABLE);
        assert_eq!(IoMask::from_poll_revents(libc::POLLERR), IoMask::READABLE);
        assert_eq!(
            IoMask::from_poll_revents(libc::POLLIN | libc::POLLOUT),
            IoMask::READABLE | IoMask::WRITABLE
        );
    }

    #[test]
    fn empty_interest_produces_no_poll_bits() {
        assert_eq!(IoMask::empty().to_poll_events(), 0);
    }
}
