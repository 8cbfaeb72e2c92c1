// src/pool/queue.rs
//! Bounded FIFO of parked lease requests.
//!
//! When every shard is fully leased, a caller that supplied a callback
//! parks here instead of failing. Returns service the queue in arrival
//! order. The queue owns its own mutex, distinct from every shard lock;
//! the only path that holds both is return-plus-hand-off, which takes
//! the shard lock first.
//!
//! Current length, capacity, peak length and growth count are shadowed
//! in atomics so statistics reads never touch the lock. The shadows are
//! updated inside the critical section but read outside it; a snapshot
//! may be one update stale, which the stats contract allows.

use crate::error::{PoolError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Callback carried by a parked lease request.
///
/// Invoked exactly once, with the leased payload, by whichever thread's
/// return services the request. It runs while that object's shard lock
/// is held: keep it short, never block in it, and never call back into
/// the pool from it.
pub type LeaseCallback = Box<dyn FnOnce(NonNull<u8>) + Send>;

struct QueueInner {
    entries: VecDeque<LeaseCallback>,
    capacity: usize,
}

pub(crate) struct ParkQueue {
    inner: Mutex<QueueInner>,
    len: AtomicUsize,
    capacity: AtomicUsize,
    peak_len: AtomicUsize,
    grow_events: AtomicU64,
}

impl ParkQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity),
                capacity,
            }),
            len: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            peak_len: AtomicUsize::new(0),
            grow_events: AtomicU64::new(0),
        }
    }

    /// Appends a parked request, doubling capacity first if the queue
    /// is full. Fails with `QueueFull` when the doubling cannot be
    /// satisfied.
    pub(crate) fn park(&self, callback: LeaseCallback) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.entries.len() == inner.capacity {
            let additional = inner.capacity;
            if self.grow_locked(&mut inner, additional).is_err() {
                return Err(PoolError::QueueFull);
            }
        }
        inner.entries.push_back(callback);
        let len = inner.entries.len();
        self.len.store(len, Ordering::Relaxed);
        self.peak_len.fetch_max(len, Ordering::Relaxed);
        Ok(())
    }

    /// Removes and returns the oldest parked request, if any.
    pub(crate) fn pop(&self) -> Option<LeaseCallback> {
        let mut inner = self.inner.lock();
        let head = inner.entries.pop_front();
        if head.is_some() {
            self.len.store(inner.entries.len(), Ordering::Relaxed);
        }
        head
    }

    /// Raises capacity by `additional` slots.
    pub(crate) fn grow(&self, additional: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        self.grow_locked(&mut inner, additional)
    }

    fn grow_locked(&self, inner: &mut QueueInner, additional: usize) -> Result<()> {
        let new_capacity = inner.capacity + additional;
        let headroom = new_capacity - inner.entries.len();
        inner
            .entries
            .try_reserve(headroom)
            .map_err(|e| PoolError::AllocFailed(format!("queue reserve: {}", e)))?;
        inner.capacity = new_capacity;
        self.capacity.store(new_capacity, Ordering::Relaxed);
        self.grow_events.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub(crate) fn peak_len(&self) -> usize {
        self.peak_len.load(Ordering::Relaxed)
    }

    pub(crate) fn grow_events(&self) -> u64 {
        self.grow_events.load(Ordering::Relaxed)
    }
}
