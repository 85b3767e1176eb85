// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Event and dispatch services.
//!
//! A [`Dispatcher`] is an ordered queue of pending [`Event`]s with at-most-one-in-flight
//! execution semantics; the [`EventService`] owns every dispatcher, picks the next due
//! event across all of them, and runs callbacks with no lock held. Ordering guarantees:
//!
//! - Events with distinct `due` ticks fire in `due` order; equal-due events fire in the
//!   order they were queued.
//! - Within one dispatcher, callbacks never overlap; across dispatchers, ready work is
//!   visited round-robin so a busy dispatcher cannot starve the rest.
//!
//! The service loop ([`EventService::service_events`]) sleeps inside the attached wait
//! service when one is present, so timers and descriptor readiness share a single
//! blocking point. Any thread that queues an earlier-due event wakes the sleeper
//! through the notifier's signal-safe wake channel.

// Attach sources.
pub mod dispatcher;
pub mod event;
pub mod service;

#[cfg(test)]
mod tests;

// Re-export.
pub use dispatcher::*;
pub use event::*;
pub use service::*;
