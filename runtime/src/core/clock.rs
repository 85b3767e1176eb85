// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Monotonic millisecond tick source and wall-clock time. See [`TickClock`].

use chrono::{DateTime, Utc};
use std::time::Instant;

/// Milliseconds since a process-local monotonic origin.
///
/// Signed so that `due - now` arithmetic and "infinite" sentinels stay natural. Ticks
/// never go backwards and never overflow in practice (`i64` milliseconds outlast the
/// host).
pub type Ticks = i64;

/// Largest timeout the runtime will hand to a host wait primitive, in milliseconds.
///
/// Negative or larger caller timeouts are clamped to this. It also serves as the
/// "never" due-time when no event is pending.
pub const MAX_TIMEOUT: Ticks = i64::MAX / 2;

/// Monotonic millisecond clock plus wall-clock reads.
///
/// Tick zero is the moment the clock was created (process init). All scheduling
/// arithmetic in the runtime uses ticks; wall-clock time appears only in cache entry
/// modification stamps.
#[derive(Clone, Copy, Debug)]
pub struct TickClock {
    origin: Instant,
}

impl TickClock {
    /// Creates a clock whose tick zero is "now".
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Current monotonic tick in milliseconds since this clock's origin.
    #[must_use]
    pub fn now_ticks(&self) -> Ticks {
        // u128 -> i64 is safe for any realistic process lifetime.
        self.origin.elapsed().as_millis() as Ticks
    }

    /// Current wall-clock time. Used for cache `last_modified` stamps only; never for
    /// scheduling.
    #[must_use]
    pub fn wall_time(&self) -> DateTime<Utc> { Utc::now() }
}

impl Default for TickClock {
    fn default() -> Self { Self::new() }
}

/// Clamps a caller-supplied timeout to `0..=cap`.
///
/// Negative values mean "wait forever" and become `cap`; `cap` itself is bounded by
/// [`MAX_TIMEOUT`]. A debug timeout cap (see
/// [`RuntimeConfig::debug_timeout_cap`](super::config::RuntimeConfig)) is applied by the
/// notifier layer, not here.
#[must_use]
pub fn clamp_timeout(timeout: Ticks, cap: Ticks) -> Ticks {
    let cap = cap.min(MAX_TIMEOUT);
    if timeout < 0 { cap } else { timeout.min(cap) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn ticks_are_monotonic() {
        let clock = TickClock::new();
        let a = clock.now_ticks();
        thread::sleep(Duration::from_millis(5));
        let b = clock.now_ticks();
        assert!(b >= a + 4, "ticks went backwards or stalled: {a} -> {b}");
    }

    #[test]
    fn negative_timeout_clamps_to_cap() {
        assert_eq!(clamp_timeout(-1, 30_000), 30_000);
        assert_eq!(clamp_timeout(-500, MAX_TIMEOUT), MAX_TIMEOUT);
    }

    #[test]
    fn oversized_timeout_clamps_to_cap() {
        assert_eq!(clamp_timeout(60_000, 30_000), 30_000);
        assert_eq!(clamp_timeout(10, 30_000), 10);
    }
}
