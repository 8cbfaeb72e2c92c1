// src/alloc.rs
//! The object lifecycle seam: caller-supplied allocation and reuse hooks.
//!
//! A pool never touches the process heap directly; every payload comes
//! from an [`ObjectAllocator`]. The two required methods move raw blocks
//! in and out of the allocator, while the lifecycle hooks (`reset`,
//! `validate`, `on_construct`, `on_destruct`, `on_reuse`) observe the
//! payload as a byte slice at well-defined points where the pool holds
//! exclusive access. State a custom allocator needs (arena handles,
//! counters, fill patterns) lives in the implementing type itself.
//!
//! [`HeapAllocator`] is the default implementation: header-prefixed
//! blocks from the global allocator, wiped before they are freed.

use crate::backptr::{HEADER_ALIGN, HEADER_BYTES};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use zeroize::Zeroize;

/// Supplies payload blocks and lifecycle hooks for one pool.
///
/// # Block contract
///
/// Every pointer returned by [`allocate`](Self::allocate) must
///
/// * be aligned to [`HEADER_ALIGN`] bytes, and
/// * be preceded by [`HEADER_BYTES`] writable bytes, reserved for the
///   pool's back-pointer header.
///
/// The pool writes the header once per record and reads it on every
/// return; an allocator that hands out unprefixed blocks corrupts
/// whatever sits in front of them.
pub trait ObjectAllocator: Send + Sync {
    /// Size in bytes of every payload this allocator produces.
    fn payload_size(&self) -> usize;

    /// Produces one payload block, or `None` when the allocator cannot.
    fn allocate(&self) -> Option<NonNull<u8>>;

    /// Frees a payload block previously returned by
    /// [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `payload` must have come from `self.allocate()` and must not be
    /// used again afterwards.
    unsafe fn release(&self, payload: NonNull<u8>);

    /// Restores a payload to its hand-out state.
    ///
    /// Fired on every lease before the object is handed out and on
    /// every return. Defaults to doing nothing.
    fn reset(&self, _payload: &mut [u8]) {}

    /// Health check fired on lease, on return and on parked hand-off.
    ///
    /// A slot whose payload fails validation is skipped on lease and
    /// refused on return. The default accepts everything; a null
    /// payload cannot exist here, `NonNull` already rules it out.
    fn validate(&self, _payload: &[u8]) -> bool {
        true
    }

    /// Fired exactly once per record, right after its block is
    /// allocated.
    fn on_construct(&self, _payload: &mut [u8]) {}

    /// Fired exactly once per record, right before its block is freed.
    fn on_destruct(&self, _payload: &mut [u8]) {}

    /// Fired on every successful lease, after [`reset`](Self::reset).
    fn on_reuse(&self, _payload: &mut [u8]) {}
}

/// Default allocator: fixed-size blocks from the global allocator.
///
/// Each block is `HEADER_BYTES + payload_size` long; the returned
/// pointer points past the header. Payload bytes are zero on first
/// hand-out and are securely wiped (via [`zeroize`]) before the block
/// goes back to the heap, so freed pool memory never carries a previous
/// user's data.
#[derive(Debug, Clone)]
pub struct HeapAllocator {
    payload_size: usize,
}

impl HeapAllocator {
    /// Creates an allocator producing `payload_size`-byte payloads.
    ///
    /// # Panics
    ///
    /// Panics if `payload_size` is 0.
    pub fn new(payload_size: usize) -> Self {
        assert!(payload_size > 0, "payload_size must be > 0");
        Self { payload_size }
    }

    fn layout(&self) -> Option<Layout> {
        Layout::from_size_align(HEADER_BYTES + self.payload_size, HEADER_ALIGN).ok()
    }
}

impl ObjectAllocator for HeapAllocator {
    fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn allocate(&self) -> Option<NonNull<u8>> {
        let layout = self.layout()?;
        // SAFETY: layout has non-zero size (header is 8 bytes).
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            return None;
        }
        // SAFETY: the block is HEADER_BYTES + payload_size long, so the
        // payload pointer stays inside it.
        NonNull::new(unsafe { base.add(HEADER_BYTES) })
    }

    unsafe fn release(&self, payload: NonNull<u8>) {
        let layout = match self.layout() {
            Some(layout) => layout,
            None => return,
        };
        unsafe {
            // Wipe the payload before the block returns to the heap.
            std::slice::from_raw_parts_mut(payload.as_ptr(), self.payload_size).zeroize();
            dealloc(payload.as_ptr().sub(HEADER_BYTES), layout);
        }
    }
}
