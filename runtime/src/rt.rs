// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-level initialization and shutdown. See [`Runtime`].

use crate::cache::Cache;
use crate::core::{RuntimeConfig, RuntimeError, RuntimeResult, TickClock, Ticks};
use crate::event::{EventService, ServiceFlags, ShutdownMode};
use crate::wait::WaitService;
use std::sync::{Arc, OnceLock};
use tracing::debug;

static SINGLETON: OnceLock<Arc<Runtime>> = OnceLock::new();

/// The assembled runtime: clock, event service, wait service with the platform
/// notifier, and access to the shared cache.
///
/// Most hosts treat the runtime as a process singleton via [`init`]/[`get`] (or the
/// [`runtime_init`] convenience wrapper); everything also works with an explicitly
/// constructed [`Runtime::new`] handle passed around by the caller - nothing in the
/// subsystems depends on the singleton.
///
/// [`get`]: Self::get
/// [`init`]: Self::init
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    clock: TickClock,
    events: Arc<EventService>,
    wait: Arc<WaitService>,
}

impl Runtime {
    /// Builds a runtime: clock, the default and non-block dispatchers, and the wait
    /// service wired into the event loop. The shared cache is built lazily on first
    /// use.
    ///
    /// # Errors
    ///
    /// [`PlatformFault`](RuntimeError::PlatformFault) when the notifier backend
    /// cannot be created.
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Arc<Self>> {
        let clock = TickClock::new();
        let events = Arc::new(EventService::new(clock, &config));
        let wait = WaitService::new(&events, &config)?;
        debug!(?config, "runtime assembled");
        Ok(Arc::new(Self {
            config,
            clock,
            events,
            wait,
        }))
    }

    /// Builds the runtime and installs it as the process singleton.
    ///
    /// # Errors
    ///
    /// [`InvalidState`](RuntimeError::InvalidState) when a runtime was already
    /// installed; otherwise as [`new`](Self::new).
    pub fn init(config: RuntimeConfig) -> RuntimeResult<Arc<Self>> {
        if SINGLETON.get().is_some() {
            return Err(RuntimeError::InvalidState {
                reason: "runtime already initialized",
            });
        }
        let runtime = Self::new(config)?;
        SINGLETON.set(Arc::clone(&runtime)).map_err(|_| {
            RuntimeError::InvalidState {
                reason: "runtime already initialized",
            }
        })?;
        Ok(runtime)
    }

    /// The installed process singleton, if any.
    #[must_use]
    pub fn get() -> Option<Arc<Self>> { SINGLETON.get().map(Arc::clone) }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig { &self.config }

    #[must_use]
    pub fn clock(&self) -> TickClock { self.clock }

    #[must_use]
    pub fn events(&self) -> &Arc<EventService> { &self.events }

    #[must_use]
    pub fn wait(&self) -> &Arc<WaitService> { &self.wait }

    /// Handle to the process-wide shared cache, building it on first use with the
    /// configured lifespan and prune resolution.
    #[must_use]
    pub fn shared_cache(&self) -> Cache {
        Cache::shared_with_defaults(
            &self.events,
            self.config.cache_lifespan,
            self.config.cache_resolution,
        )
    }

    /// Drives the event loop for up to `timeout` ms. See
    /// [`EventService::service_events`].
    ///
    /// # Errors
    ///
    /// As [`EventService::service_events`].
    pub fn service_events(&self, timeout: Ticks, flags: ServiceFlags) -> RuntimeResult<usize> {
        self.events.service_events(timeout, flags)
    }

    /// Winds the loop down. [`ShutdownMode::Graceful`] drains due events first;
    /// [`ShutdownMode::Immediate`] returns at the next turn;
    /// [`ShutdownMode::Default`] uses the strategy configured via
    /// [`EventService::set_default_shutdown`] (graceful out of the box).
    pub fn shutdown(&self, mode: ShutdownMode) {
        debug!(?mode, "runtime shutdown requested");
        self.events.request_stop(mode);
    }
}

/// Singleton-style initialization with configuration from the environment.
///
/// # Errors
///
/// As [`Runtime::init`].
pub fn runtime_init() -> RuntimeResult<Arc<Runtime>> { Runtime::init(RuntimeConfig::from_env()) }

/// Shuts the singleton runtime down; a no-op when none was installed.
pub fn runtime_shutdown(mode: ShutdownMode) {
    if let Some(runtime) = Runtime::get() {
        runtime.shutdown(mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn runtime_wires_timers_and_io_into_one_loop() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in_callback = Arc::clone(&fired);

        runtime
            .events()
            .create_event(
                None,
                "hello",
                10,
                Box::new(move |_| {
                    fired_in_callback.fetch_add(1, Ordering::SeqCst);
                }),
                EventFlags::empty(),
            )
            .unwrap();

        // The sleep happens inside the notifier backend here, not the condvar.
        let dispatched = runtime.service_events(500, ServiceFlags::ONCE).unwrap();
        assert_eq!(dispatched, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cross_thread_queue_wakes_backend_sleep() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let loop_runtime = Arc::clone(&runtime);
        let worker = thread::spawn(move || {
            let begin = Instant::now();
            let dispatched = loop_runtime.service_events(2_000, ServiceFlags::ONCE).unwrap();
            (dispatched, begin.elapsed())
        });

        thread::sleep(Duration::from_millis(50));
        runtime
            .events()
            .create_event(None, "poke", 0, Box::new(|_| {}), EventFlags::empty())
            .unwrap();

        let (dispatched, elapsed) = worker.join().unwrap();
        assert_eq!(dispatched, 1);
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }

    #[test]
    fn immediate_shutdown_stops_the_loop() {
        let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
        let loop_runtime = Arc::clone(&runtime);
        let worker = thread::spawn(move || {
            let begin = Instant::now();
            loop_runtime.service_events(5_000, ServiceFlags::empty()).unwrap();
            begin.elapsed()
        });

        thread::sleep(Duration::from_millis(50));
        runtime.shutdown(ShutdownMode::Immediate);
        let elapsed = worker.join().unwrap();
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }
}
