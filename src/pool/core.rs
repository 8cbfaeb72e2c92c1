// src/pool/core.rs
//! The pool: shard coordination, backpressure and resize.
//!
//! # Locking
//!
//! Two lock kinds exist: one mutex per shard and one on the parked
//! queue. The only path that ever holds two is return-plus-hand-off,
//! which takes the object's shard lock first and the queue lock second;
//! no path holds two shard locks and no path takes the queue lock
//! first. That ordering makes deadlock impossible.
//!
//! # Hand-off runs under the shard lock
//!
//! A parked callback fires on the returning thread while the slot's
//! shard is still locked: the same mutex that proves the free→busy
//! transition covers the invocation, so no concurrent returner can see
//! a half-transferred slot. The price is a contract on callbacks: be
//! quick, never block, never call back into the pool.

use crate::alloc::{HeapAllocator, ObjectAllocator};
use crate::backptr::{BackPointer, MAX_SHARDS};
use crate::error::{ErrorSink, PoolError, Result, StderrSink};
use crate::rng;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

use super::config::PoolConfig;
use super::queue::{LeaseCallback, ParkQueue};
use super::shard::{Shard, payload_slice};
use super::stats::PoolStats;

/// Splits `total` across `parts` as evenly as possible, earlier parts
/// taking the remainder.
fn split_even(total: usize, parts: usize) -> impl Iterator<Item = usize> {
    let base = total / parts;
    let rem = total % parts;
    (0..parts).map(move |i| base + usize::from(i < rem))
}

struct PoolInner {
    shards: Vec<Shard>,
    queue: ParkQueue,
    alloc: Arc<dyn ObjectAllocator>,
    sink: Arc<dyn ErrorSink>,
    /// Currently leased objects, pool-wide. Moved under the owning
    /// shard's lock so it never lags a shard-local busy count.
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    capacity: AtomicUsize,
    total_allocated: AtomicU64,
    grow_events: AtomicU64,
    shrink_events: AtomicU64,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Remaining parked entries drop uninvoked with the queue.
        for shard in &mut self.shards {
            shard.inner_mut().destroy_all(&*self.alloc);
        }
    }
}

/// A sharded pool of reusable fixed-size objects.
///
/// Cloning is cheap and shares the pool; the objects are destroyed when
/// the last clone drops.
///
/// # Example
///
/// ```rust
/// use shardpool::prelude::*;
///
/// let pool = Pool::with_defaults(64)?;
/// let mut obj = pool.acquire()?;
/// obj[0] = 0xA5;
/// drop(obj); // returned to its shard
/// assert_eq!(pool.in_use(), 0);
/// # Ok::<(), shardpool::PoolError>(())
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

/// Outcome of [`Pool::acquire_or_park`].
pub enum Acquired {
    /// An object was free; the callback was dropped unused. The caller
    /// owns the payload and returns it through
    /// [`Pool::release_raw`].
    Ready(NonNull<u8>),
    /// Every shard was exhausted; the callback is queued and will fire
    /// on a future return.
    Parked,
}

impl Pool {
    /// Creates a pool from `config`, drawing objects from `alloc`.
    /// Failures are reported to standard error.
    pub fn new(config: PoolConfig, alloc: Arc<dyn ObjectAllocator>) -> Result<Self> {
        Self::with_error_sink(config, alloc, Arc::new(StderrSink))
    }

    /// Creates a default pool (16 objects, 4 shards, queue capacity 32)
    /// of `payload_size`-byte heap objects.
    pub fn with_defaults(payload_size: usize) -> Result<Self> {
        let sink: Arc<dyn ErrorSink> = Arc::new(StderrSink);
        if payload_size == 0 {
            return report(&*sink, PoolError::InvalidSize("payload_size must be >= 1".into()));
        }
        Self::with_error_sink(
            PoolConfig::default(),
            Arc::new(HeapAllocator::new(payload_size)),
            sink,
        )
    }

    /// Creates a pool with an explicit error sink.
    pub fn with_error_sink(
        config: PoolConfig,
        alloc: Arc<dyn ObjectAllocator>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        if config.pool_size == 0 {
            return report(&*sink, PoolError::InvalidSize("pool_size must be >= 1".into()));
        }
        if config.shard_count == 0 || config.shard_count > MAX_SHARDS {
            return report(
                &*sink,
                PoolError::InvalidSize(format!(
                    "shard_count {} outside 1..={}",
                    config.shard_count, MAX_SHARDS
                )),
            );
        }
        if config.queue_capacity == 0 {
            return report(
                &*sink,
                PoolError::InvalidSize("queue_capacity must be >= 1".into()),
            );
        }

        let shards = (0..config.shard_count)
            .map(|id| Shard::new(id as u16))
            .collect();
        let inner = Arc::new(PoolInner {
            shards,
            queue: ParkQueue::new(config.queue_capacity),
            alloc,
            sink,
            busy: AtomicUsize::new(0),
            peak_busy: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
            total_allocated: AtomicU64::new(0),
            grow_events: AtomicU64::new(0),
            shrink_events: AtomicU64::new(0),
        });
        let pool = Self { inner };

        for (shard, count) in pool.inner.shards.iter().zip(split_even(
            config.pool_size,
            config.shard_count,
        )) {
            let mut guard = shard.lock_timed();
            let before = guard.len();
            let outcome = guard.grow_by(shard.id(), count, &*pool.inner.alloc);
            let added = guard.len() - before;
            drop(guard);
            pool.inner.capacity.fetch_add(added, Ordering::Relaxed);
            if let Err(err) = outcome {
                // Dropping `pool` destroys everything constructed so far.
                return report(&*pool.inner.sink, err);
            }
        }
        pool.inner
            .total_allocated
            .store(config.pool_size as u64, Ordering::Relaxed);

        debug!(
            pool_size = config.pool_size,
            shard_count = config.shard_count,
            queue_capacity = config.queue_capacity,
            payload_size = pool.inner.alloc.payload_size(),
            "pool created"
        );
        Ok(pool)
    }

    /// Size in bytes of every payload this pool hands out.
    pub fn payload_size(&self) -> usize {
        self.inner.alloc.payload_size()
    }

    /// Leases an object, wrapped in a guard that returns it on drop.
    pub fn acquire(&self) -> Result<Leased<'_>> {
        let payload = self.acquire_raw()?;
        Ok(Leased {
            payload: Some(payload),
            len: self.payload_size(),
            pool: self,
        })
    }

    /// Leases an object as a raw payload pointer.
    ///
    /// The pointer stays valid until it is passed to
    /// [`release_raw`](Self::release_raw) or the pool is destroyed,
    /// whichever comes first. Callers that may outlive the pool must
    /// keep a clone of it.
    pub fn acquire_raw(&self) -> Result<NonNull<u8>> {
        match self.probe_shards() {
            Some(payload) => Ok(payload),
            None => self.fail(PoolError::Exhausted),
        }
    }

    /// Leases an object if one is free, otherwise parks `callback` to
    /// receive the next returned object.
    ///
    /// Parked callbacks fire in FIFO order, exactly once each, on the
    /// thread performing the return and **while that object's shard
    /// lock is held**: they must be short, must not block, and must
    /// not call back into the pool. Entries still parked when the pool
    /// is destroyed are dropped without firing.
    pub fn acquire_or_park<F>(&self, callback: F) -> Result<Acquired>
    where
        F: FnOnce(NonNull<u8>) + Send + 'static,
    {
        if let Some(payload) = self.probe_shards() {
            return Ok(Acquired::Ready(payload));
        }
        let callback: LeaseCallback = Box::new(callback);
        match self.inner.queue.park(callback) {
            Ok(()) => Ok(Acquired::Parked),
            Err(_) => self.fail(PoolError::QueueFull),
        }
    }

    /// Probes every shard once, starting at a randomised entry point.
    fn probe_shards(&self) -> Option<NonNull<u8>> {
        let inner = &self.inner;
        let count = inner.shards.len();
        let entry = rng::pick_shard(count);
        for offset in 0..count {
            let shard = &inner.shards[(entry + offset) % count];
            let mut guard = shard.lock_timed();
            if let Some(payload) =
                guard.lease_lowest_free(shard.id(), &*inner.alloc, &*inner.sink)
            {
                // Gauge moves before the lock drops so the global peak
                // can never lag a shard-local one.
                let now_busy = inner.busy.fetch_add(1, Ordering::Relaxed) + 1;
                inner.peak_busy.fetch_max(now_busy, Ordering::Relaxed);
                return Some(payload);
            }
        }
        None
    }

    /// Returns a leased object to its slot.
    ///
    /// The back-pointer header in front of `payload` locates the slot
    /// in O(1); the slot is then verified to still reference `payload`
    /// and to be leased, so stale pointers (including pointers whose
    /// record a shrink destroyed) and double returns are refused with
    /// `InvalidObject`. If parked requests are waiting, the object is
    /// handed to the oldest one before this call returns.
    ///
    /// # Safety
    ///
    /// `payload` must have been obtained from a lease on this pool.
    /// After this call the caller must not touch the payload again.
    pub unsafe fn release_raw(&self, payload: NonNull<u8>) -> Result<()> {
        let inner = &self.inner;
        // SAFETY: lease-derived pointers carry a live header.
        let bp = unsafe { BackPointer::read(payload) };
        let shard = match inner.shards.get(bp.shard()) {
            Some(shard) => shard,
            None => {
                return self.fail(PoolError::InvalidObject(format!(
                    "back-pointer names shard {} of {}",
                    bp.shard(),
                    inner.shards.len()
                )));
            }
        };

        let mut guard = shard.lock_timed();
        if let Err(err) = guard.release_verified(bp.index(), payload, &*inner.alloc) {
            return self.fail(err);
        }

        // Hand-off: validate before taking the head so a rejected
        // object leaves the request parked for the next return.
        let mut handed_off = false;
        let view = unsafe { payload_slice(payload, inner.alloc.payload_size()) };
        if inner.alloc.validate(view) {
            if let Some(callback) = inner.queue.pop() {
                guard.release_for_handoff(bp.index(), &*inner.alloc);
                handed_off = true;
                callback(payload);
            }
        }
        if !handed_off {
            inner.busy.fetch_sub(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Adds `additional` objects, spread evenly across the shards.
    ///
    /// On failure the shards grown before the failing one (and any
    /// records the failing shard managed to construct) keep their new
    /// size, visible through [`capacity`](Self::capacity); the
    /// lifetime-allocation and grow counters advance only when every
    /// shard grew.
    pub fn grow(&self, additional: usize) -> Result<()> {
        if additional == 0 {
            return self.fail(PoolError::InvalidSize("grow of 0 objects".into()));
        }
        let inner = &self.inner;
        for (shard, count) in inner
            .shards
            .iter()
            .zip(split_even(additional, inner.shards.len()))
        {
            if count == 0 {
                continue;
            }
            let mut guard = shard.lock_timed();
            let before = guard.len();
            let outcome = guard.grow_by(shard.id(), count, &*inner.alloc);
            let added = guard.len() - before;
            drop(guard);
            inner.capacity.fetch_add(added, Ordering::Relaxed);
            if let Err(err) = outcome {
                return self.fail(err);
            }
        }
        inner
            .total_allocated
            .fetch_add(additional as u64, Ordering::Relaxed);
        inner.grow_events.fetch_add(1, Ordering::Relaxed);
        debug!(additional, capacity = self.capacity(), "pool grew");
        Ok(())
    }

    /// Destroys `count` free objects, taken evenly off the shards'
    /// high ends.
    ///
    /// A shard refuses unless its share of the reduction is covered by
    /// contiguous free slots at its tail. The walk stops at the first
    /// refusal: earlier shards stay shrunk, later shards are not
    /// touched, and no busy slot is ever destroyed.
    pub fn shrink(&self, count: usize) -> Result<()> {
        if count == 0 {
            return self.fail(PoolError::InvalidSize("shrink of 0 objects".into()));
        }
        if count > self.capacity() {
            return self.fail(PoolError::InvalidSize(format!(
                "shrink of {} exceeds capacity {}",
                count,
                self.capacity()
            )));
        }
        let inner = &self.inner;
        for (shard, share) in inner
            .shards
            .iter()
            .zip(split_even(count, inner.shards.len()))
        {
            if share == 0 {
                continue;
            }
            let mut guard = shard.lock_timed();
            let outcome = guard.shrink_by(share, &*inner.alloc);
            drop(guard);
            match outcome {
                Ok(()) => {
                    inner.capacity.fetch_sub(share, Ordering::Relaxed);
                }
                Err(err) => return self.fail(err),
            }
        }
        inner.shrink_events.fetch_add(1, Ordering::Relaxed);
        debug!(count, capacity = self.capacity(), "pool shrank");
        Ok(())
    }

    /// Raises the parked-queue capacity by `additional` entries.
    pub fn grow_queue(&self, additional: usize) -> Result<()> {
        if additional == 0 {
            return self.fail(PoolError::InvalidSize("queue grow of 0 entries".into()));
        }
        match self.inner.queue.grow(additional) {
            Ok(()) => {
                debug!(
                    additional,
                    queue_capacity = self.inner.queue.capacity(),
                    "parked queue grew"
                );
                Ok(())
            }
            Err(err) => self.fail(err),
        }
    }

    /// Currently leased objects across all shards.
    pub fn in_use(&self) -> usize {
        self.inner.busy.load(Ordering::Relaxed)
    }

    /// Current total slot count across all shards.
    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Relaxed)
    }

    /// Parked lease requests currently waiting.
    pub fn parked(&self) -> usize {
        self.inner.queue.len()
    }

    /// Takes a statistics snapshot, locking each shard briefly in turn.
    ///
    /// Per-shard sums are exact per shard; the pool-level gauges are
    /// copied without any cross-shard synchronisation. See
    /// [`PoolStats`].
    pub fn stats(&self) -> PoolStats {
        let inner = &self.inner;
        let mut stats = PoolStats {
            capacity: inner.capacity.load(Ordering::Relaxed),
            in_use: inner.busy.load(Ordering::Relaxed),
            peak_in_use: inner.peak_busy.load(Ordering::Relaxed),
            total_allocated: inner.total_allocated.load(Ordering::Relaxed),
            grow_events: inner.grow_events.load(Ordering::Relaxed),
            shrink_events: inner.shrink_events.load(Ordering::Relaxed),
            parked: inner.queue.len(),
            queue_capacity: inner.queue.capacity(),
            queue_peak: inner.queue.peak_len(),
            queue_grow_events: inner.queue.grow_events(),
            ..Default::default()
        };
        for shard in &inner.shards {
            let guard = shard.lock_timed();
            stats.total_acquired += guard.total_acquired;
            stats.total_released += guard.total_released;
            stats.contended_lock_acquires += guard.contended_acquires;
            stats.lock_wait_ns += guard.lock_wait_ns;
        }
        stats
    }

    /// Lifetime lease count of every shard, in shard order.
    pub fn shard_acquire_counts(&self) -> Vec<u64> {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.lock_timed().total_acquired)
            .collect()
    }

    /// Resolves a leased payload to its `(shard, slot)` coordinates.
    ///
    /// Returns `None` when the back-pointer does not check out against
    /// the pool's current state.
    ///
    /// # Safety
    ///
    /// `payload` must have been obtained from a lease on this pool and
    /// not yet returned.
    pub unsafe fn locate(&self, payload: NonNull<u8>) -> Option<(usize, usize)> {
        // SAFETY: per this function's contract the header is live.
        let bp = unsafe { BackPointer::read(payload) };
        let shard = self.inner.shards.get(bp.shard())?;
        let guard = shard.lock_timed();
        let slot = guard.slot(bp.index())?;
        (slot.payload() == payload && slot.is_busy()).then_some((bp.shard(), bp.index()))
    }

    /// Reports `err` to the sink, then returns it.
    fn fail<T>(&self, err: PoolError) -> Result<T> {
        report(&*self.inner.sink, err)
    }
}

fn report<T>(sink: &dyn ErrorSink, err: PoolError) -> Result<T> {
    sink.report(err.kind(), &err.to_string());
    Err(err)
}

// ---------------------------------------------------------------------------
// Leased
// ---------------------------------------------------------------------------

/// An object leased from a [`Pool`].
///
/// Dereferences to the payload bytes and returns the object when
/// dropped. Use [`into_raw`](Self::into_raw) to take over the raw
/// pointer instead.
pub struct Leased<'a> {
    payload: Option<NonNull<u8>>,
    len: usize,
    pool: &'a Pool,
}

impl std::fmt::Debug for Leased<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leased")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

// SAFETY: the guard is the exclusive owner of its payload bytes and the
// pool it points back into is Sync.
unsafe impl Send for Leased<'_> {}

impl Leased<'_> {
    /// The raw payload pointer, without giving up the guard.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.payload.unwrap()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload is zero-sized (it never is; pools refuse a
    /// zero payload size).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Extracts the raw pointer, opting out of the automatic return.
    ///
    /// The caller becomes responsible for passing the pointer to
    /// [`Pool::release_raw`] eventually; until then the object counts
    /// as leased.
    pub fn into_raw(mut self) -> NonNull<u8> {
        self.payload.take().unwrap()
    }
}

impl Deref for Leased<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        // SAFETY: the lease grants exclusive access to `len` bytes.
        unsafe { std::slice::from_raw_parts(self.payload.unwrap().as_ptr(), self.len) }
    }
}

impl DerefMut for Leased<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as above, and `&mut self` makes the access unique.
        unsafe { std::slice::from_raw_parts_mut(self.payload.unwrap().as_ptr(), self.len) }
    }
}

impl Drop for Leased<'_> {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.take() {
            // SAFETY: the pointer came from this pool's lease and is
            // surrendered here.
            let returned = unsafe { self.pool.release_raw(payload) };
            debug_assert!(returned.is_ok(), "guard return rejected: {:?}", returned);
        }
    }
}
