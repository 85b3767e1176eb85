// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The keyed, versioned, lifespan-bounded store and its timer-driven pruning. See
//! [`Cache`].

use super::entry::{CacheEntry, CacheRead, CacheStats, Lifespan, WriteMode, WriteOptions};
use crate::core::{RuntimeError, RuntimeResult, TickClock, Ticks};
use crate::event::{EventFlags, EventHandle, EventService};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, trace};

/// Capacity sentinel: no limit on keys or memory.
const UNBOUNDED: usize = usize::MAX;

/// First eviction horizon of the capacity pass: entries expiring within the next five
/// minutes are fair game. Each round without progress widens the horizon fourfold.
const PRUNE_HORIZON_MS: Ticks = 5 * 60 * 1_000;

/// Process-wide shared cache slot. The slot owns the only strong reference; every
/// shared [`Cache`] handle is a facade holding a weak one.
static SHARED: Mutex<Option<Arc<CacheInner>>> = Mutex::new(None);

struct CacheState {
    store: FxHashMap<String, CacheEntry>,
    max_keys: usize,
    max_mem: usize,
    /// Default entry lifespan (ms).
    lifespan: Ticks,
    /// Milliseconds between prune passes.
    resolution: Ticks,
    /// Estimated bytes: sum of `key.len() + data.len()`.
    used_mem: usize,
    /// The periodic prune event; exists iff the store is non-empty.
    timer: Option<EventHandle>,
}

pub(crate) struct CacheInner {
    events: Weak<EventService>,
    clock: TickClock,
    state: Mutex<CacheState>,
}

enum Backing {
    /// Privately owned store.
    Owned(Arc<CacheInner>),
    /// Facade over the process-wide shared store. `creator` marks the handle whose
    /// [`destroy`](Cache::destroy) severs the singleton.
    Shared { inner: Weak<CacheInner>, creator: bool },
}

/// Keyed in-process cache with per-entry lifespans, version stamps, and memory/key
/// ceilings.
///
/// Every operation takes the cache's own mutex; pruning runs as a periodic event on
/// the process-default dispatcher and competes for that mutex with `try_lock`, so a
/// long-running writer can never make prune passes queue up behind it.
///
/// A shared, process-wide instance is available through [`Cache::shared`]; handles to
/// it are facades over one singleton. Dropping or destroying a facade leaves the
/// singleton intact; destroying the creating handle severs all facades, whose next
/// operation then observes no entries.
pub struct Cache {
    backing: Backing,
}

impl Cache {
    /// Creates a private cache with the built-in default lifespan and prune
    /// resolution. Limits default to unbounded. Use [`with_defaults`](Self::with_defaults)
    /// to honor configured knobs.
    #[must_use]
    pub fn new(events: &Arc<EventService>) -> Self {
        Self::with_defaults(
            events,
            crate::core::DEFAULT_CACHE_LIFESPAN,
            crate::core::DEFAULT_CACHE_RESOLUTION,
        )
    }

    /// [`new`](Self::new) with explicit default lifespan and prune resolution.
    #[must_use]
    pub fn with_defaults(
        events: &Arc<EventService>,
        default_lifespan: Ticks,
        resolution: Ticks,
    ) -> Self {
        Self {
            backing: Backing::Owned(Self::build_inner(events, default_lifespan, resolution)),
        }
    }

    /// Binds to the process-wide shared cache, constructing it on the first call.
    #[must_use]
    pub fn shared(events: &Arc<EventService>) -> Self {
        Self::shared_with_defaults(
            events,
            crate::core::DEFAULT_CACHE_LIFESPAN,
            crate::core::DEFAULT_CACHE_RESOLUTION,
        )
    }

    /// [`shared`](Self::shared) with explicit defaults, applied only when this call
    /// is the one that constructs the singleton.
    #[must_use]
    pub fn shared_with_defaults(
        events: &Arc<EventService>,
        default_lifespan: Ticks,
        resolution: Ticks,
    ) -> Self {
        let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some(inner) => Self {
                backing: Backing::Shared {
                    inner: Arc::downgrade(inner),
                    creator: false,
                },
            },
            None => {
                let inner = Self::build_inner(events, default_lifespan, resolution);
                let weak = Arc::downgrade(&inner);
                *slot = Some(inner);
                Self {
                    backing: Backing::Shared {
                        inner: weak,
                        creator: true,
                    },
                }
            }
        }
    }

    fn build_inner(
        events: &Arc<EventService>,
        default_lifespan: Ticks,
        resolution: Ticks,
    ) -> Arc<CacheInner> {
        Arc::new(CacheInner {
            events: Arc::downgrade(events),
            clock: events.clock(),
            state: Mutex::new(CacheState {
                store: FxHashMap::default(),
                max_keys: UNBOUNDED,
                max_mem: UNBOUNDED,
                lifespan: default_lifespan,
                resolution,
                used_mem: 0,
                timer: None,
            }),
        })
    }

    /// Tears the cache down. On the handle that created the shared singleton this
    /// severs every other facade; on any other handle it only drops this reference.
    pub fn destroy(self) {
        if let Backing::Shared { creator: true, .. } = self.backing {
            let mut slot = SHARED.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(inner) = slot.take() {
                inner.cancel_timer();
            }
        }
    }

    fn inner(&self) -> RuntimeResult<Arc<CacheInner>> {
        match &self.backing {
            Backing::Owned(inner) => Ok(Arc::clone(inner)),
            Backing::Shared { inner, .. } => {
                inner.upgrade().ok_or(RuntimeError::InvalidState {
                    reason: "shared cache was destroyed",
                })
            }
        }
    }

    /// Adjusts ceilings and defaults. `0` keeps the current value; a negative value
    /// or `i64::MAX` means unbounded (for the key and memory ceilings).
    ///
    /// # Errors
    ///
    /// [`InvalidState`](RuntimeError::InvalidState) on a severed shared facade.
    pub fn set_limits(
        &self,
        max_keys: i64,
        default_lifespan: Ticks,
        max_mem: i64,
        resolution: Ticks,
    ) -> RuntimeResult<()> {
        let inner = self.inner()?;
        let mut state = inner.lock();
        match max_keys {
            0 => {}
            k if k < 0 || k == i64::MAX => state.max_keys = UNBOUNDED,
            k => state.max_keys = k as usize,
        }
        match max_mem {
            0 => {}
            m if m < 0 || m == i64::MAX => state.max_mem = UNBOUNDED,
            m => state.max_mem = m as usize,
        }
        if default_lifespan > 0 {
            state.lifespan = default_lifespan;
        }
        if resolution > 0 {
            state.resolution = resolution;
        }
        Ok(())
    }

    /// Stores `value` under `key` per the write options. Returns the bytes now held
    /// for the entry (`key + data`), or `0` for an [`Add`](WriteMode::Add) that found
    /// the key already present.
    ///
    /// Starts the prune timer on the first write into an empty store.
    ///
    /// # Errors
    ///
    /// - [`VersionMismatch`] when `expected_version` is set and stale.
    /// - [`InvalidState`] on a severed shared facade.
    ///
    /// [`InvalidState`]: RuntimeError::InvalidState
    /// [`VersionMismatch`]: RuntimeError::VersionMismatch
    pub fn write(&self, key: &str, value: &[u8], options: WriteOptions) -> RuntimeResult<usize> {
        let inner = self.inner()?;
        let now = inner.clock.now_ticks();
        let mut state = inner.lock();

        let existing = state.store.get(key);
        if let (Some(entry), Some(expected)) = (existing, options.expected_version)
            && entry.version != expected
        {
            return Err(RuntimeError::VersionMismatch {
                expected,
                found: entry.version,
            });
        }
        if matches!(options.mode, WriteMode::Add) && existing.is_some() {
            return Ok(0);
        }

        let old_len = existing.map_or(0, |entry| key.len() + entry.data.len());
        let default_lifespan = state.lifespan;
        let entry = state.store.entry(key.to_string()).or_insert_with(|| CacheEntry {
            data: Vec::new(),
            lifespan: default_lifespan,
            last_accessed: now,
            expires: 0,
            last_modified: inner.clock.wall_time(),
            version: 0,
        });

        match options.mode {
            WriteMode::Set | WriteMode::Add => entry.data = value.to_vec(),
            WriteMode::Append => entry.data.extend_from_slice(value),
            WriteMode::Prepend => {
                let mut combined = value.to_vec();
                combined.extend_from_slice(&entry.data);
                entry.data = combined;
            }
        }
        match options.lifespan {
            // Default (and a non-positive duration) keeps the entry's current
            // lifespan, which for a fresh entry is the cache default.
            Lifespan::Default => {}
            Lifespan::Millis(ms) if ms > 0 => entry.lifespan = ms,
            Lifespan::Millis(_) => {}
            Lifespan::Immortal => entry.lifespan = 0,
        }
        entry.last_modified = options.modified.unwrap_or_else(|| inner.clock.wall_time());
        entry.last_accessed = now;
        entry.expires = if entry.lifespan > 0 { now + entry.lifespan } else { 0 };
        entry.version += 1;

        let version = entry.version;
        let new_len = key.len() + entry.data.len();
        state.used_mem = state.used_mem + new_len - old_len;
        trace!(key, new_len, version, "cache write");

        inner.ensure_timer(&mut state);
        Ok(new_len)
    }

    /// Looks `key` up. A hit refreshes `last_accessed` and pushes `expires` out by
    /// the entry's lifespan; an absent or expired key is a miss (`None`).
    ///
    /// A severed shared facade also reports a miss: it observes no entries.
    ///
    /// # Errors
    ///
    /// None today; the `Result` mirrors the other operations.
    pub fn read(&self, key: &str) -> RuntimeResult<Option<CacheRead>> {
        let Ok(inner) = self.inner() else {
            return Ok(None);
        };
        let now = inner.clock.now_ticks();
        let mut state = inner.lock();
        let expired = match state.store.get(key) {
            None => return Ok(None),
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            // Lazy reclamation: a miss on an expired entry removes it right away
            // rather than leaving it for the next prune pass.
            CacheInner::remove_entry(&mut state, key);
            inner.cancel_timer_if_empty(&mut state);
            return Ok(None);
        }
        let Some(entry) = state.store.get_mut(key) else {
            return Ok(None);
        };
        entry.last_accessed = now;
        if entry.lifespan > 0 {
            entry.expires = now + entry.lifespan;
        }
        Ok(Some(CacheRead {
            value: entry.data.clone(),
            modified: entry.last_modified,
            version: entry.version,
        }))
    }

    /// Atomically treats the stored value as a decimal signed integer (absent keys
    /// count as zero), adds `delta`, stores the result, and bumps the version.
    /// Returns the new value.
    ///
    /// # Errors
    ///
    /// [`InvalidState`](RuntimeError::InvalidState) on a severed shared facade.
    pub fn increment(&self, key: &str, delta: i64) -> RuntimeResult<i64> {
        let inner = self.inner()?;
        let now = inner.clock.now_ticks();
        let mut state = inner.lock();

        let default_lifespan = state.lifespan;
        let old_len = state
            .store
            .get(key)
            .map_or(0, |entry| key.len() + entry.data.len());
        let wall = inner.clock.wall_time();
        let entry = state.store.entry(key.to_string()).or_insert_with(|| CacheEntry {
            data: Vec::new(),
            lifespan: default_lifespan,
            last_accessed: now,
            expires: 0,
            last_modified: wall,
            version: 0,
        });

        let current: i64 = std::str::from_utf8(&entry.data)
            .ok()
            .and_then(|text| text.trim().parse().ok())
            .unwrap_or(0);
        let value = current.wrapping_add(delta);
        entry.data = value.to_string().into_bytes();
        entry.version += 1;
        entry.last_accessed = now;
        entry.last_modified = wall;
        entry.expires = if entry.lifespan > 0 { now + entry.lifespan } else { 0 };

        let new_len = key.len() + entry.data.len();
        state.used_mem = state.used_mem + new_len - old_len;
        inner.ensure_timer(&mut state);
        Ok(value)
    }

    /// Rewrites an entry's absolute eviction tick. `0` removes the entry right away.
    ///
    /// # Errors
    ///
    /// [`NotFound`](RuntimeError::NotFound) when the key is absent;
    /// [`InvalidState`](RuntimeError::InvalidState) on a severed shared facade.
    pub fn expire_item(&self, key: &str, expires: Ticks) -> RuntimeResult<()> {
        let inner = self.inner()?;
        let mut state = inner.lock();
        if expires == 0 {
            let removed = CacheInner::remove_entry(&mut state, key);
            if removed {
                inner.cancel_timer_if_empty(&mut state);
                return Ok(());
            }
            return Err(RuntimeError::NotFound);
        }
        match state.store.get_mut(key) {
            Some(entry) => {
                entry.expires = expires;
                Ok(())
            }
            None => Err(RuntimeError::NotFound),
        }
    }

    /// Removes one key, or every key when `key` is `None`. Returns whether anything
    /// was removed.
    ///
    /// # Errors
    ///
    /// [`InvalidState`](RuntimeError::InvalidState) on a severed shared facade.
    pub fn remove(&self, key: Option<&str>) -> RuntimeResult<bool> {
        let inner = self.inner()?;
        let mut state = inner.lock();
        let removed = match key {
            Some(key) => CacheInner::remove_entry(&mut state, key),
            None => {
                let had_entries = !state.store.is_empty();
                state.store.clear();
                state.used_mem = 0;
                had_entries
            }
        };
        inner.cancel_timer_if_empty(&mut state);
        Ok(removed)
    }

    /// Forces a full prune pass, exactly as if the periodic event ran now.
    ///
    /// # Errors
    ///
    /// [`InvalidState`](RuntimeError::InvalidState) on a severed shared facade.
    pub fn prune(&self) -> RuntimeResult<()> {
        let inner = self.inner()?;
        let mut state = inner.lock();
        inner.prune_pass(&mut state);
        Ok(())
    }

    /// Key count and estimated memory use. A severed shared facade reports zeros.
    ///
    /// # Errors
    ///
    /// None today; the `Result` mirrors the other operations.
    pub fn stats(&self) -> RuntimeResult<CacheStats> {
        let Ok(inner) = self.inner() else {
            return Ok(CacheStats::default());
        };
        let state = inner.lock();
        Ok(CacheStats {
            keys: state.store.len(),
            used_mem: state.used_mem,
        })
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backing {
            Backing::Owned(_) => "owned",
            Backing::Shared { creator: true, .. } => "shared (creator)",
            Backing::Shared { .. } => "shared (facade)",
        };
        f.debug_struct("Cache").field("backing", &kind).finish()
    }
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove_entry(state: &mut CacheState, key: &str) -> bool {
        match state.store.remove(key) {
            Some(entry) => {
                state.used_mem -= key.len() + entry.data.len();
                true
            }
            None => false,
        }
    }

    /// Starts the prune timer if the store has entries and no timer is running. The
    /// timer event holds only a weak reference; when the cache goes away the event
    /// cancels itself on its next firing.
    fn ensure_timer(self: &Arc<Self>, state: &mut CacheState) {
        if state.timer.is_some() || state.store.is_empty() {
            return;
        }
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let cache = Arc::downgrade(self);
        let engine = Arc::downgrade(&events);
        debug!(resolution = state.resolution, "starting cache prune timer");
        let timer = events.create_timer_event(
            None,
            "cache-pruner",
            state.resolution,
            Box::new(move |context| match cache.upgrade() {
                Some(cache) => cache.prune_from_timer(),
                None => {
                    if let Some(engine) = engine.upgrade() {
                        engine.remove_event(context.event);
                    }
                }
            }),
            EventFlags::empty(),
        );
        match timer {
            Ok(timer) => state.timer = Some(timer),
            Err(err) => debug!("cache prune timer not started: {err}"),
        }
    }

    fn cancel_timer(&self) {
        let mut state = self.lock();
        self.cancel_timer_if_empty(&mut state);
    }

    fn cancel_timer_if_empty(&self, state: &mut CacheState) {
        if !state.store.is_empty() {
            return;
        }
        if let (Some(timer), Some(events)) = (state.timer.take(), self.events.upgrade()) {
            events.remove_event(timer);
        }
    }

    /// Timer entry point: skip the pass entirely rather than queue behind a
    /// long-running cache operation.
    fn prune_from_timer(self: &Arc<Self>) {
        let Ok(mut state) = self.state.try_lock() else {
            return;
        };
        self.prune_pass(&mut state);
    }

    /// The two-pass eviction policy.
    ///
    /// 1. **Expired pass** - every entry whose eviction tick has arrived is removed.
    /// 2. **Capacity pass** - while over the key or memory ceiling, evict the
    ///    soonest-expiring entry within a sliding horizon (5 minutes, then widening
    ///    fourfold per empty round). Immortal entries are never evicted here.
    ///
    /// When the store ends up empty the periodic timer is cancelled; the next write
    /// recreates it.
    fn prune_pass(&self, state: &mut CacheState) {
        let now = self.clock.now_ticks();

        let expired: Vec<String> = state
            .store
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            trace!(key = %key, "cache prune: expired");
            Self::remove_entry(state, key);
        }

        if state.max_keys != UNBOUNDED || state.max_mem != UNBOUNDED {
            let mut horizon = PRUNE_HORIZON_MS;
            let mut within = now + horizon;
            while state.store.len() > state.max_keys || state.used_mem > state.max_mem {
                let candidate = state
                    .store
                    .iter()
                    .filter(|(_, entry)| entry.expires > 0 && entry.expires <= within)
                    .min_by_key(|(_, entry)| entry.expires)
                    .map(|(key, _)| key.clone());
                match candidate {
                    Some(key) => {
                        trace!(key = %key, "cache prune: over capacity");
                        Self::remove_entry(state, &key);
                    }
                    None => {
                        // Nothing mortal inside the horizon; widen it, or give up if
                        // only immortal entries remain.
                        if !state.store.values().any(|entry| entry.expires > 0) {
                            break;
                        }
                        horizon *= 4;
                        within = now + horizon;
                    }
                }
            }
        }
        debug_assert!(
            state.used_mem
                == state
                    .store
                    .iter()
                    .map(|(key, entry)| key.len() + entry.data.len())
                    .sum::<usize>()
        );

        self.cancel_timer_if_empty(state);
    }
}
