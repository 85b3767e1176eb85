// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue eventfd

//! Wait-for-I/O services.
//!
//! A [`WaitHandler`] registers interest in readiness on one descriptor; the
//! [`WaitService`] owns the registry and a platform [`Notifier`] backend, and turns
//! kernel readiness into I/O events on each handler's dispatcher. Three backends share
//! identical `arm`/`wait`/`wake` semantics, selected at build time:
//!
//! | Backend | Host | Wake channel |
//! | :--- | :--- | :--- |
//! | [`kernel_poll`] | Linux (`epoll`) | `eventfd` |
//! | [`kernel_queue`] | macOS, FreeBSD (`kqueue`) | `EVFILT_USER` trigger |
//! | [`poll_set`] | everything else (`poll`) | UDP self-loopback datagram |
//!
//! Readiness delivery suppresses the backend registration until the handler's
//! callback re-arms with [`WaitService::wait_on`], so one handler's callbacks never
//! overlap. The [recall] path synthesizes readable notifications for handlers whose
//! owners buffer data above the kernel.
//!
//! [recall]: WaitService::recall_handler

// Attach sources.
pub mod handler;
pub mod kernel_poll;
pub mod kernel_queue;
pub mod mask;
pub mod notifier;
pub mod poll_set;
pub mod service;

#[cfg(test)]
pub(crate) mod tests;

// Re-export.
pub use handler::*;
#[cfg(target_os = "linux")]
pub use kernel_poll::*;
#[cfg(any(target_os = "macos", target_os = "freebsd"))]
pub use kernel_queue::*;
pub use mask::*;
pub use notifier::*;
pub use poll_set::*;
pub use service::*;
