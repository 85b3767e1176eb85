// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Shared fixtures for wait-service and backend tests, plus the end-to-end readiness
//! scenarios.

use std::os::fd::RawFd;

mod io_scenarios;

/// RAII wrapper for one end of a `pipe(2)` pair.
pub(crate) struct PipeEnd {
    fd: RawFd,
}

impl PipeEnd {
    pub(crate) fn fd(&self) -> RawFd { self.fd }

    /// Writes a single byte; panics on failure so tests fail loudly.
    pub(crate) fn write_byte(&self, byte: u8) {
        // Safety: fd is open for the lifetime of self; one-byte buffer.
        let rc = unsafe { libc::write(self.fd, std::ptr::from_ref(&byte).cast(), 1) };
        assert_eq!(rc, 1, "pipe write failed: {}", std::io::Error::last_os_error());
    }

    /// Non-blocking drain; returns how many bytes were read.
    pub(crate) fn drain(&self) -> usize {
        let mut buffer = [0u8; 64];
        let mut total = 0;
        loop {
            // Safety: buffer is valid for its full length.
            let rc = unsafe { libc::read(self.fd, buffer.as_mut_ptr().cast(), buffer.len()) };
            if rc <= 0 {
                return total;
            }
            total += rc as usize;
        }
    }
}

impl Drop for PipeEnd {
    fn drop(&mut self) {
        // Safety: fd was returned by pipe() and is closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}

/// Creates a non-blocking pipe: `(read_end, write_end)`.
pub(crate) fn pipe_pair() -> (PipeEnd, PipeEnd) {
    let mut fds = [0 as RawFd; 2];
    // Safety: fds points at two writable slots.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe() failed: {}", std::io::Error::last_os_error());
    for fd in fds {
        // Safety: valid fd; fcntl flag juggling only.
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
    (PipeEnd { fd: fds[0] }, PipeEnd { fd: fds[1] })
}
