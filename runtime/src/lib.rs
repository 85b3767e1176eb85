// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

// cspell:words epoll kqueue eventfd

//! # keel_runtime
//!
//! A cross-platform application runtime that unifies timed event dispatching, I/O
//! readiness notification, and memory-aware in-process caching on one substrate, so
//! server-style applications do not re-implement these facilities per host.
//!
//! ## The three subsystems
//!
//! 1. **[Event engine]** - one-shot and periodic events on per-dispatcher ordered
//!    queues, with cooperative scheduling of user callbacks. Within a dispatcher,
//!    callbacks are strictly serialized; across dispatchers, ready work round-robins.
//!    Cancel and reschedule are idempotent and safe from any thread, including from
//!    inside a running callback.
//!
//! 2. **[Wait service]** - a backend-blind readiness facade over the host's
//!    notification API: `epoll(7)` on Linux, `kqueue(2)` on macOS/FreeBSD, and a
//!    level-triggered `poll(2)` set elsewhere. All three expose identical
//!    `arm`/`wait`/`wake` semantics; the wake channel is safe to use from signal
//!    handlers and lets any thread unblock the service mid-wait.
//!
//! 3. **[Cache]** - a keyed store with per-entry lifespans, monotone version stamps
//!    for optimistic-concurrency writes, memory and key-count ceilings, and a
//!    timer-driven eviction pass that runs as an ordinary periodic event.
//!
//! The subsystems interlock: a wait handler's readiness becomes an event on its
//! dispatcher; the cache's pruning is a recurring event; and the service loop sleeps
//! inside the notifier backend so timers and descriptor readiness share one blocking
//! point.
//!
//! ## Getting started
//!
//! ```no_run
//! use keel_runtime::{Runtime, RuntimeConfig, EventFlags, ServiceFlags};
//!
//! # fn main() -> keel_runtime::RuntimeResult<()> {
//! let runtime = Runtime::new(RuntimeConfig::from_env())?;
//!
//! runtime.events().create_timer_event(
//!     None,                       // process-default dispatcher
//!     "heartbeat",
//!     1_000,                      // every second
//!     Box::new(|_| println!("tick")),
//!     EventFlags::empty(),
//! )?;
//!
//! // Drive timers and I/O for five seconds.
//! runtime.service_events(5_000, ServiceFlags::empty())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! The engine is designed around a single service thread, though any thread may queue
//! events, write the cache, or wake the loop. No runtime lock is ever held across a
//! user callback. Cross-references between subsystems are generational arena handles
//! ([`core::arena`]), never raw pointers: a stale handle fails lookups instead of
//! dangling.
//!
//! All state is process-local and volatile; nothing persists across exit.
//!
//! [Cache]: crate::cache::Cache
//! [Event engine]: crate::event::EventService
//! [Wait service]: crate::wait::WaitService

// Attach sources.
pub mod cache;
pub mod core;
pub mod event;
pub mod log;
pub mod rt;
pub mod wait;

// Re-export the public surface at the crate root.
pub use cache::{Cache, CacheRead, CacheStats, Lifespan, WriteMode, WriteOptions};
pub use crate::core::{RuntimeConfig, RuntimeError, RuntimeResult, TickClock, Ticks};
pub use event::{
    DispatcherFlags, DispatcherHandle, EventContext, EventFlags, EventHandle, EventProc,
    EventService, ServiceFlags, ShutdownMode,
};
pub use log::try_init_tracing;
pub use rt::{Runtime, runtime_init, runtime_shutdown};
pub use wait::{
    HandlerFlags, IoContext, IoMask, WaitHandle, WaitProc, WaitService, wait_for_single_io,
};
