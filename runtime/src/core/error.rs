// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Unified error type for the runtime. See [`RuntimeError`] for the failure taxonomy and
//! the propagation rules each subsystem follows.

use std::io;

/// Convenience alias used by every fallible public operation in this crate.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// The failure taxonomy shared by the event, wait, and cache subsystems.
///
/// Interrupted system calls (`EINTR`) never appear here - the notifier backends retry
/// them internally. Everything else is returned to the caller; [`PlatformFault`] is
/// additionally logged at error level by the subsystem that observed it, with the OS
/// error chain preserved via `#[source]`.
///
/// [`PlatformFault`]: Self::PlatformFault
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum RuntimeError {
    /// Null, out-of-range, or impossible argument combination.
    #[error("invalid argument: {reason}")]
    #[diagnostic(code(keel_runtime::invalid_argument))]
    InvalidArgument {
        /// What the caller got wrong.
        reason: &'static str,
    },

    /// Operation on a destroyed dispatcher, a closed wait service, or a severed shared
    /// cache facade.
    #[error("invalid state: {reason}")]
    #[diagnostic(
        code(keel_runtime::invalid_state),
        help("The target was destroyed or never initialized; re-create it before use.")
    )]
    InvalidState {
        /// Which lifecycle rule was violated.
        reason: &'static str,
    },

    /// Key not in the cache, or handler/event/dispatcher handle not in its registry.
    #[error("not found")]
    #[diagnostic(code(keel_runtime::not_found))]
    NotFound,

    /// Optimistic-concurrency cache write failed: the entry's version moved on.
    #[error("version mismatch: expected {expected}, found {found}")]
    #[diagnostic(
        code(keel_runtime::version_mismatch),
        help("Re-read the key to obtain the current version, then retry the write.")
    )]
    VersionMismatch {
        /// Version the writer presented.
        expected: u64,
        /// Version actually stored.
        found: u64,
    },

    /// File descriptor beyond the backend capacity, or a value beyond its maximum size.
    #[error("out of range: {reason}")]
    #[diagnostic(
        code(keel_runtime::out_of_range),
        help(
            "Check OS resource limits - use `ulimit -n` for the per-process file \
             descriptor ceiling."
        )
    )]
    OutOfRange {
        /// Which limit was exceeded.
        reason: &'static str,
    },

    /// A cache write would exceed a hard memory ceiling.
    #[error("capacity exceeded: {reason}")]
    #[diagnostic(code(keel_runtime::capacity_exceeded))]
    CapacityExceeded {
        /// Which ceiling was hit.
        reason: &'static str,
    },

    /// Unexpected host API failure (epoll/kqueue/poll/socket). Propagated and logged.
    #[error("platform fault in {op}")]
    #[diagnostic(code(keel_runtime::platform_fault))]
    PlatformFault {
        /// The host operation that failed.
        op: &'static str,
        /// The underlying OS error.
        #[source]
        source: io::Error,
    },
}

impl RuntimeError {
    /// Wraps the current `errno` as a [`PlatformFault`] for the named host operation.
    ///
    /// [`PlatformFault`]: Self::PlatformFault
    #[must_use]
    pub fn platform(op: &'static str) -> Self {
        Self::PlatformFault {
            op,
            source: io::Error::last_os_error(),
        }
    }
}
