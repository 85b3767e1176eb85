// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Process-level configuration knobs. See [`RuntimeConfig`].

use super::clock::Ticks;
use std::env;

/// Default maximum readiness events returned per backend wait.
pub const DEFAULT_MAX_EVENTS: usize = 32;

/// First UDP port the poll-set backend tries for its wake channel.
pub const DEFAULT_WAKEUP_PORT: u16 = 9473;

/// Default cache prune resolution: one pass per minute.
pub const DEFAULT_CACHE_RESOLUTION: Ticks = 60 * 1_000;

/// Default cache entry lifespan: one day.
pub const DEFAULT_CACHE_LIFESPAN: Ticks = 86_400 * 1_000;

/// Default file-descriptor ceiling enforced by the handler registry and the poll-set
/// backend.
pub const DEFAULT_MAX_FD: i32 = 1_024;

/// Tunable knobs recognized by [`Runtime::init`], each overridable through a `KEEL_*`
/// environment variable.
///
/// | Field | Env var | Default |
/// | :--- | :--- | :--- |
/// | `max_events` | `KEEL_MAX_EVENTS` | 32 |
/// | `wakeup_port` | `KEEL_WAKEUP_PORT` | 9473 |
/// | `debug_timeout_cap` | `KEEL_DEBUG_TIMEOUT_CAP` | none |
/// | `cache_resolution` | `KEEL_CACHE_RESOLUTION` | 60 000 ms |
/// | `cache_lifespan` | `KEEL_CACHE_LIFESPAN` | 86 400 000 ms |
///
/// Unset or unparsable variables fall back to the built-in default.
///
/// [`Runtime::init`]: crate::Runtime::init
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Maximum readiness events returned per backend wait. Clamped to at least 1.
    pub max_events: usize,
    /// Starting UDP port for the poll-set backend's wake channel port scan.
    pub wakeup_port: u16,
    /// When set, every backend wait timeout is clamped to at most this many
    /// milliseconds. Intended for interactive debugging so a stuck loop stays
    /// responsive.
    pub debug_timeout_cap: Option<Ticks>,
    /// Default milliseconds between cache prune passes.
    pub cache_resolution: Ticks,
    /// Default cache entry lifespan in milliseconds.
    pub cache_lifespan: Ticks,
    /// Highest file descriptor value the wait service accepts.
    pub max_fd: i32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            wakeup_port: DEFAULT_WAKEUP_PORT,
            debug_timeout_cap: None,
            cache_resolution: DEFAULT_CACHE_RESOLUTION,
            cache_lifespan: DEFAULT_CACHE_LIFESPAN,
            max_fd: DEFAULT_MAX_FD,
        }
    }
}

impl RuntimeConfig {
    /// Builds a configuration from the defaults overlaid with any `KEEL_*` environment
    /// variables that are set and parse cleanly.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_events: parse_env("KEEL_MAX_EVENTS")
                .unwrap_or(defaults.max_events)
                .max(1),
            wakeup_port: parse_env("KEEL_WAKEUP_PORT").unwrap_or(defaults.wakeup_port),
            debug_timeout_cap: parse_env("KEEL_DEBUG_TIMEOUT_CAP"),
            cache_resolution: parse_env("KEEL_CACHE_RESOLUTION")
                .unwrap_or(defaults.cache_resolution),
            cache_lifespan: parse_env("KEEL_CACHE_LIFESPAN")
                .unwrap_or(defaults.cache_lifespan),
            max_fd: defaults.max_fd,
        }
    }

    /// Applies the debug timeout cap, if configured, to a wait timeout.
    #[must_use]
    pub fn cap_wait_timeout(&self, timeout: Ticks) -> Ticks {
        match self.debug_timeout_cap {
            Some(cap) => timeout.min(cap),
            None => timeout,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}
