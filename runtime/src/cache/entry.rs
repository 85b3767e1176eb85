// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Cache entry and write-option types.

use crate::core::Ticks;
use chrono::{DateTime, Utc};

/// One stored value with its lifespan, access stamps, and version.
#[derive(Clone, Debug)]
pub(crate) struct CacheEntry {
    pub data: Vec<u8>,
    /// Time-to-live refreshed on each access (ms). `0` marks the entry immortal.
    pub lifespan: Ticks,
    pub last_accessed: Ticks,
    /// Absolute eviction tick. `0` means never; otherwise
    /// `expires == last_accessed + lifespan` whenever the lifespan is positive.
    pub expires: Ticks,
    /// Wall-clock stamp of the last mutation.
    pub last_modified: DateTime<Utc>,
    /// Monotonically increasing across every successful write or increment.
    pub version: u64,
}

impl CacheEntry {
    pub(crate) fn is_expired(&self, now: Ticks) -> bool {
        self.expires > 0 && self.expires <= now
    }
}

/// How a write combines with an existing entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Store the value unconditionally.
    #[default]
    Set,
    /// Store only when the key does not exist; an existing key makes the write a
    /// silent no-op that reports zero bytes stored.
    Add,
    /// Concatenate after the existing value (empty when absent).
    Append,
    /// Concatenate before the existing value (empty when absent).
    Prepend,
}

/// Per-entry lifespan requested by a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifespan {
    /// Use the cache's default lifespan (new entries) or keep the current one
    /// (existing entries).
    #[default]
    Default,
    /// Expire this many milliseconds after each access.
    Millis(Ticks),
    /// Never expire; the entry survives every prune pass.
    Immortal,
}

/// Options for [`Cache::write`](super::Cache::write).
#[derive(Clone, Copy, Debug, Default)]
pub struct WriteOptions {
    pub mode: WriteMode,
    pub lifespan: Lifespan,
    /// When set, the write succeeds only if the stored version matches.
    pub expected_version: Option<u64>,
    /// Wall-clock modification stamp; defaults to "now".
    pub modified: Option<DateTime<Utc>>,
}

impl WriteOptions {
    /// Plain unconditional set with default lifespan.
    #[must_use]
    pub fn set() -> Self { Self::default() }

    #[must_use]
    pub fn mode(mode: WriteMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_lifespan(mut self, lifespan_ms: Ticks) -> Self {
        self.lifespan = Lifespan::Millis(lifespan_ms);
        self
    }

    #[must_use]
    pub fn expecting_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// A successful [`Cache::read`](super::Cache::read).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheRead {
    pub value: Vec<u8>,
    pub modified: DateTime<Utc>,
    pub version: u64,
}

/// Point-in-time counters from [`Cache::stats`](super::Cache::stats).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub keys: usize,
    /// Estimated bytes: the sum of `key.len() + data.len()` across entries.
    pub used_mem: usize,
}
