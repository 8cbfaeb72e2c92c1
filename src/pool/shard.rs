// src/pool/shard.rs
//! One contention-isolation partition of the pool.
//!
//! A shard is a mutex-protected array of slots plus its own lifetime
//! counters. All slot state (busy bits, the array length, payload
//! pointers) is touched only under the shard lock. Leases hand out the
//! lowest-indexed free slot, which herds busy slots toward the low end
//! of the array and keeps a contiguous free tail available for shrink.

use crate::alloc::ObjectAllocator;
use crate::backptr::{BackPointer, MAX_SLOTS_PER_SHARD};
use crate::error::{ErrorKind, ErrorSink, PoolError, Result};
use parking_lot::{Mutex, MutexGuard};
use std::ptr::NonNull;
use std::time::Instant;

/// One object record: the payload block and its busy bit.
///
/// The record's back-pointer lives in the header in front of the
/// payload, not here; it is written when the record is constructed and
/// stays put until the record is destroyed.
pub(crate) struct Slot {
    payload: NonNull<u8>,
    busy: bool,
}

// SAFETY: the payload pointer refers to an allocator-owned block that
// only the pool (under the shard lock) or the current leaseholder
// touches; moving the record between threads transfers nothing shared.
unsafe impl Send for Slot {}

impl Slot {
    pub(crate) fn payload(&self) -> NonNull<u8> {
        self.payload
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy
    }
}

/// Mutable view of a payload for lifecycle hooks.
///
/// # Safety
///
/// Caller must hold the owning shard's lock and the slot must not be
/// leased out (or the caller must be the party transferring the lease).
#[inline]
pub(crate) unsafe fn payload_slice<'a>(payload: NonNull<u8>, len: usize) -> &'a mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(payload.as_ptr(), len) }
}

pub(crate) struct ShardInner {
    slots: Vec<Slot>,
    pub(crate) busy_count: usize,
    pub(crate) total_acquired: u64,
    pub(crate) total_released: u64,
    pub(crate) peak_busy: usize,
    pub(crate) contended_acquires: u64,
    pub(crate) lock_wait_ns: u64,
}

pub(crate) struct Shard {
    id: u16,
    inner: Mutex<ShardInner>,
}

impl Shard {
    pub(crate) fn new(id: u16) -> Self {
        Self {
            id,
            inner: Mutex::new(ShardInner {
                slots: Vec::new(),
                busy_count: 0,
                total_acquired: 0,
                total_released: 0,
                peak_busy: 0,
                contended_acquires: 0,
                lock_wait_ns: 0,
            }),
        }
    }

    pub(crate) fn id(&self) -> u16 {
        self.id
    }

    /// Lock-free access for pool teardown, where `&mut` proves no other
    /// holder exists.
    pub(crate) fn inner_mut(&mut self) -> &mut ShardInner {
        self.inner.get_mut()
    }

    /// Acquires the shard lock, charging any wait to the contention
    /// counters.
    pub(crate) fn lock_timed(&self) -> MutexGuard<'_, ShardInner> {
        if let Some(guard) = self.inner.try_lock() {
            return guard;
        }
        let start = Instant::now();
        let mut guard = self.inner.lock();
        guard.contended_acquires += 1;
        guard.lock_wait_ns += start.elapsed().as_nanos() as u64;
        guard
    }
}

impl ShardInner {
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Leases the lowest-indexed free slot, if any.
    ///
    /// Slots whose payload fails validation are reported to the sink
    /// and skipped; the scan keeps going. On success the slot is busy,
    /// the counters are up to date and `reset` + `on_reuse` have fired.
    pub(crate) fn lease_lowest_free(
        &mut self,
        shard_id: u16,
        alloc: &dyn ObjectAllocator,
        sink: &dyn ErrorSink,
    ) -> Option<NonNull<u8>> {
        if self.busy_count == self.slots.len() {
            return None;
        }
        let payload_size = alloc.payload_size();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.busy {
                continue;
            }
            // SAFETY: free slot under the shard lock; nobody else can
            // touch the payload.
            let payload = unsafe { payload_slice(slot.payload, payload_size) };
            if !alloc.validate(payload) {
                sink.report(
                    ErrorKind::InvalidObject,
                    &format!("shard {} slot {} failed validation; skipped", shard_id, index),
                );
                continue;
            }
            slot.busy = true;
            self.busy_count += 1;
            self.total_acquired += 1;
            self.peak_busy = self.peak_busy.max(self.busy_count);
            alloc.reset(payload);
            alloc.on_reuse(payload);
            return Some(slot.payload);
        }
        None
    }

    /// Verifies a returned pointer against its claimed slot and frees
    /// the slot.
    ///
    /// Rejections leave all state untouched.
    pub(crate) fn release_verified(
        &mut self,
        index: usize,
        payload: NonNull<u8>,
        alloc: &dyn ObjectAllocator,
    ) -> Result<()> {
        let slot = match self.slots.get_mut(index) {
            Some(slot) => slot,
            None => {
                return Err(PoolError::InvalidObject(format!(
                    "slot index {} out of range",
                    index
                )));
            }
        };
        if slot.payload != payload {
            return Err(PoolError::InvalidObject(
                "pointer does not belong to its claimed slot".into(),
            ));
        }
        if !slot.busy {
            return Err(PoolError::InvalidObject(format!(
                "slot {} is not leased (double return?)",
                index
            )));
        }
        // SAFETY: busy slot being handed back under the shard lock; the
        // returning caller has relinquished access.
        let view = unsafe { payload_slice(slot.payload, alloc.payload_size()) };
        if !alloc.validate(view) {
            return Err(PoolError::InvalidObject(format!(
                "slot {} failed validation on return",
                index
            )));
        }
        slot.busy = false;
        self.busy_count -= 1;
        self.total_released += 1;
        alloc.reset(view);
        Ok(())
    }

    /// Re-leases a just-freed slot to a parked requester.
    ///
    /// The return path has already fired `reset`; only `on_reuse` is
    /// due here.
    pub(crate) fn release_for_handoff(&mut self, index: usize, alloc: &dyn ObjectAllocator) {
        let slot = &mut self.slots[index];
        debug_assert!(!slot.busy);
        slot.busy = true;
        self.busy_count += 1;
        self.total_acquired += 1;
        self.peak_busy = self.peak_busy.max(self.busy_count);
        // SAFETY: slot is free and the shard lock is held.
        let view = unsafe { payload_slice(slot.payload, alloc.payload_size()) };
        alloc.on_reuse(view);
    }

    /// Appends `count` freshly constructed records.
    ///
    /// Records constructed before a mid-loop allocation failure are
    /// kept; the caller observes the partial growth through the slot
    /// count.
    pub(crate) fn grow_by(
        &mut self,
        shard_id: u16,
        count: usize,
        alloc: &dyn ObjectAllocator,
    ) -> Result<()> {
        let payload_size = alloc.payload_size();
        for _ in 0..count {
            let index = self.slots.len() as u64;
            if index >= MAX_SLOTS_PER_SHARD {
                return Err(PoolError::InvalidSize(format!(
                    "shard {} cannot exceed {} slots",
                    shard_id, MAX_SLOTS_PER_SHARD
                )));
            }
            let payload = alloc.allocate().ok_or_else(|| {
                PoolError::AllocFailed(format!(
                    "allocator refused object {} of shard {}",
                    index, shard_id
                ))
            })?;
            // SAFETY: the allocator contract reserves the header bytes
            // in front of every payload.
            unsafe { BackPointer::pack(shard_id, index).write(payload) };
            // SAFETY: fresh block, not yet visible to any lease.
            alloc.on_construct(unsafe { payload_slice(payload, payload_size) });
            self.slots.push(Slot {
                payload,
                busy: false,
            });
        }
        Ok(())
    }

    /// Destroys `count` records off the high end of the slot array.
    ///
    /// Refuses, destroying nothing, unless the top `count` slots are
    /// all free.
    pub(crate) fn shrink_by(&mut self, count: usize, alloc: &dyn ObjectAllocator) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let free_tail = self
            .slots
            .iter()
            .rev()
            .take_while(|slot| !slot.busy)
            .count();
        if free_tail < count {
            return Err(PoolError::InsufficientFree {
                requested: count,
                free_tail,
            });
        }
        let payload_size = alloc.payload_size();
        for _ in 0..count {
            let slot = self.slots.pop().expect("free tail counted above");
            unsafe {
                alloc.on_destruct(payload_slice(slot.payload, payload_size));
                alloc.release(slot.payload);
            }
        }
        // A peak above the new size is no longer reachable locally; the
        // pool-global peak stays monotonic.
        self.peak_busy = self.peak_busy.min(self.slots.len());
        Ok(())
    }

    /// Destroys every record, busy or not. Pool teardown only.
    pub(crate) fn destroy_all(&mut self, alloc: &dyn ObjectAllocator) {
        let payload_size = alloc.payload_size();
        for slot in self.slots.drain(..) {
            unsafe {
                alloc.on_destruct(payload_slice(slot.payload, payload_size));
                alloc.release(slot.payload);
            }
        }
        self.busy_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::error::StderrSink;

    fn shard_with(alloc: &HeapAllocator, slots: usize) -> Shard {
        let shard = Shard::new(3);
        shard.lock_timed().grow_by(3, slots, alloc).unwrap();
        shard
    }

    #[test]
    fn test_lease_takes_lowest_index() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 4);
        let mut inner = shard.lock_timed();

        let first = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        assert_eq!(first, inner.slot(0).unwrap().payload());

        let second = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        assert_eq!(second, inner.slot(1).unwrap().payload());
        assert_eq!(inner.busy_count, 2);
        assert_eq!(inner.peak_busy, 2);

        inner.destroy_all(&alloc);
    }

    #[test]
    fn test_release_reuses_low_slot() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 3);
        let mut inner = shard.lock_timed();

        let a = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        let _b = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        inner.release_verified(0, a, &alloc).unwrap();

        // Slot 0 is free again and is preferred over slot 2.
        let again = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        assert_eq!(again, a);

        inner.destroy_all(&alloc);
    }

    #[test]
    fn test_release_rejects_double_return() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 2);
        let mut inner = shard.lock_timed();

        let payload = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        inner.release_verified(0, payload, &alloc).unwrap();

        let err = inner.release_verified(0, payload, &alloc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidObject);
        assert_eq!(inner.busy_count, 0);
        assert_eq!(inner.total_released, 1);

        inner.destroy_all(&alloc);
    }

    #[test]
    fn test_release_rejects_wrong_pointer() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 2);
        let mut inner = shard.lock_timed();

        let a = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        let _b = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();

        // a belongs to slot 0, not slot 1.
        let err = inner.release_verified(1, a, &alloc).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidObject);
        assert_eq!(inner.busy_count, 2);

        inner.destroy_all(&alloc);
    }

    #[test]
    fn test_shrink_needs_free_tail() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 4);
        let mut inner = shard.lock_timed();

        let _a = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        let _b = inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();

        // Two busy at the low end, two free at the tail.
        assert!(inner.shrink_by(3, &alloc).is_err());
        assert_eq!(inner.len(), 4);

        inner.shrink_by(2, &alloc).unwrap();
        assert_eq!(inner.len(), 2);
        assert_eq!(inner.busy_count, 2);

        inner.destroy_all(&alloc);
    }

    #[test]
    fn test_shrink_clamps_local_peak() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 4);
        let mut inner = shard.lock_timed();

        for _ in 0..4 {
            inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        }
        assert_eq!(inner.peak_busy, 4);
        for index in 0..4 {
            let payload = inner.slot(index).unwrap().payload();
            inner.release_verified(index, payload, &alloc).unwrap();
        }

        inner.shrink_by(3, &alloc).unwrap();
        assert_eq!(inner.peak_busy, 1);

        inner.destroy_all(&alloc);
    }

    #[test]
    fn test_exhausted_shard_leases_nothing() {
        let alloc = HeapAllocator::new(32);
        let shard = shard_with(&alloc, 1);
        let mut inner = shard.lock_timed();

        inner.lease_lowest_free(3, &alloc, &StderrSink).unwrap();
        assert!(inner.lease_lowest_free(3, &alloc, &StderrSink).is_none());

        inner.destroy_all(&alloc);
    }
}
