// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Low-level atomic helpers: a full barrier, counter extensions that return the **new**
//! value, and a lock-free prepend-only list.
//!
//! All operations use [`SeqCst`] ordering so callers never have to choose.
//!
//! ## The `fetch_add` quirk
//!
//! `fetch_add` atomically adds to the stored value but returns the **old** value, not
//! the new one. The extension traits here derive the new value locally via
//! `wrapping_add` on the returned old value rather than issuing a second load - a
//! separate load would race with other threads' increments and could return someone
//! else's value.
//!
//! [`SeqCst`]: Ordering::SeqCst

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicPtr, AtomicU64, Ordering, fence};

/// Full memory barrier: no load or store may be reordered across this point.
pub fn barrier() { fence(Ordering::SeqCst) }

/// Ergonomic compare-and-swap for pointer-sized words.
pub trait AtomicPtrExt<T> {
    /// Atomically replaces `expected` with `desired`. Returns whether the swap took
    /// effect; on `false` the stored pointer was not `expected`.
    fn cas(&self, expected: *mut T, desired: *mut T) -> bool;
}

impl<T> AtomicPtrExt<T> for AtomicPtr<T> {
    fn cas(&self, expected: *mut T, desired: *mut T) -> bool {
        self.compare_exchange(expected, desired, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Ergonomic helpers for [`AtomicI32`] counters.
pub trait AtomicI32Ext {
    /// Atomically adds `delta` and returns the **new** value.
    fn add(&self, delta: i32) -> i32;
}

impl AtomicI32Ext for AtomicI32 {
    fn add(&self, delta: i32) -> i32 {
        self.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }
}

/// Ergonomic helpers for [`AtomicI64`] counters.
///
/// 64-bit adds are lock-free on every supported target; there is no wide-counter
/// fallback path.
pub trait AtomicI64Ext {
    /// Atomically adds `delta` and returns the **new** value.
    fn add(&self, delta: i64) -> i64;
}

impl AtomicI64Ext for AtomicI64 {
    fn add(&self, delta: i64) -> i64 {
        self.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
    }
}

/// Ergonomic helpers for [`AtomicU64`] counters (version stamps, event counts).
pub trait AtomicU64Ext {
    /// Atomically increments and returns the **new** value.
    fn increment(&self) -> u64;
}

impl AtomicU64Ext for AtomicU64 {
    fn increment(&self) -> u64 { self.fetch_add(1, Ordering::SeqCst).wrapping_add(1) }
}

/// One-shot latch used to coalesce wake requests.
///
/// [`request`] returns `true` only for the caller that flipped the latch from idle to
/// requested; every concurrent caller sees `false` and skips the (syscall-bearing) wake
/// write. [`clear`] re-arms the latch after the sleeping side has woken.
///
/// Both operations are a single atomic instruction - safe from signal handlers.
///
/// [`clear`]: Self::clear
/// [`request`]: Self::request
#[derive(Debug, Default)]
pub struct WakeLatch {
    requested: AtomicBool,
}

impl WakeLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Attempts to claim the latch. `true` means the caller must deliver the wake.
    pub fn request(&self) -> bool { !self.requested.swap(true, Ordering::SeqCst) }

    /// Re-arms the latch. Called by the woken thread after its wait returns.
    pub fn clear(&self) { self.requested.store(false, Ordering::SeqCst) }
}

/// Lock-free prepend-only list of `T`.
///
/// Concurrent `push` from any number of threads; `drain` swaps the whole chain out and
/// hands back the nodes newest-first. The prepend loop retries **while the CAS fails**,
/// re-reading the head each round.
#[derive(Debug)]
pub struct AtomicStack<T> {
    head: std::sync::atomic::AtomicPtr<Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

impl<T> AtomicStack<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: std::sync::atomic::AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Prepends `value` at the head. Lock-free; safe from any thread.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: std::ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::SeqCst);
        loop {
            // Safety: `node` is exclusively ours until the CAS publishes it.
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detaches the entire chain and returns the values newest-first.
    pub fn drain(&self) -> Vec<T> {
        let mut node = self.head.swap(std::ptr::null_mut(), Ordering::SeqCst);
        let mut out = Vec::new();
        while !node.is_null() {
            // Safety: the swap above made this chain exclusively ours.
            let boxed = unsafe { Box::from_raw(node) };
            out.push(boxed.value);
            node = boxed.next;
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.head.load(Ordering::SeqCst).is_null() }
}

impl<T> Default for AtomicStack<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Drop for AtomicStack<T> {
    fn drop(&mut self) { drop(self.drain()) }
}

// Safety: nodes are heap-allocated and ownership transfers through atomic pointer
// operations only.
unsafe impl<T: Send> Send for AtomicStack<T> {}
unsafe impl<T: Send> Sync for AtomicStack<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn counter_add_returns_new_value() {
        let counter = AtomicI64::new(40);
        assert_eq!(counter.add(2), 42);
        assert_eq!(counter.add(-2), 40);
    }

    #[test]
    fn cas_swaps_only_on_match() {
        let mut first = 1;
        let mut second = 2;
        let slot = AtomicPtr::new(&mut first as *mut i32);

        assert!(!slot.cas(&mut second, std::ptr::null_mut()));
        assert!(slot.cas(&mut first, &mut second));
        assert_eq!(slot.load(Ordering::SeqCst), &mut second as *mut i32);
    }

    #[test]
    fn wake_latch_coalesces_until_cleared() {
        let latch = WakeLatch::new();
        assert!(latch.request());
        assert!(!latch.request());
        assert!(!latch.request());
        latch.clear();
        assert!(latch.request());
    }

    #[test]
    fn stack_drain_returns_newest_first() {
        let stack = AtomicStack::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(stack.drain(), vec![3, 2, 1]);
        assert!(stack.is_empty());
    }

    #[test]
    fn concurrent_pushes_lose_nothing() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let stack = Arc::new(AtomicStack::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let stack = Arc::clone(&stack);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        stack.push(t * PER_THREAD + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut drained = stack.drain();
        drained.sort_unstable();
        let expected: Vec<usize> = (0..THREADS * PER_THREAD).collect();
        assert_eq!(drained, expected);
    }
}
