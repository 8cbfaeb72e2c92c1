// src/lib.rs
//! # Sharded Reusable-Object Pool
//!
//! A process-local cache of pre-constructed objects that callers lease
//! and return, amortising allocation and initialisation costs on hot
//! paths (request buffers, protocol frames, scratch structures).
//!
//! Features:
//! - Sharded free-lists: leases enter at a per-thread randomised shard
//!   and probe linearly, diluting lock contention
//! - O(1) returns via a back-pointer header carried by every object
//! - Bounded backpressure queue: exhausted leases park a callback that
//!   fires, FIFO, when an object comes back
//! - Dynamic resize: grow, shrink and queue-grow that never lose or
//!   double-count objects
//! - Per-shard statistics (leases, returns, peaks, lock contention)
//!   aggregated into eventually-consistent snapshots
//! - Pluggable object lifecycle ([`ObjectAllocator`]) and error
//!   reporting ([`ErrorSink`]); the default allocator wipes payload
//!   bytes before freeing them
//!
//! The pool never blocks a lease: a caller either gets an object, a
//! parked indication, or a reported failure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod alloc;
mod backptr;
pub mod error;
pub mod pool;
mod rng;

// Re-export main types
pub use alloc::{HeapAllocator, ObjectAllocator};
pub use backptr::{HEADER_ALIGN, HEADER_BYTES, MAX_SHARDS, MAX_SLOTS_PER_SHARD};
pub use error::{ErrorKind, ErrorSink, PoolError, Result, StderrSink};
pub use pool::{
    Acquired, DEFAULT_PAYLOAD_SIZE, LeaseCallback, Leased, Pool, PoolConfig, PoolStats,
};

/// Commonly used imports.
pub mod prelude {
    pub use crate::alloc::{HeapAllocator, ObjectAllocator};
    pub use crate::error::{ErrorKind, ErrorSink, PoolError, Result, StderrSink};
    pub use crate::pool::{
        Acquired, DEFAULT_PAYLOAD_SIZE, LeaseCallback, Leased, Pool, PoolConfig, PoolStats,
    };
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_default_pool() {
        let pool = Pool::with_defaults(DEFAULT_PAYLOAD_SIZE).unwrap();
        assert_eq!(pool.capacity(), 16);
        assert_eq!(pool.payload_size(), 64);

        let mut obj = pool.acquire().unwrap();
        obj.copy_from_slice(&[0x42; 64]);
        drop(obj);

        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.stats().total_released, 1);
    }

    #[test]
    fn test_lease_return_cycle() {
        let pool = Pool::with_defaults(32).unwrap();

        let objs: Vec<_> = (0..8).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.in_use(), 8);
        drop(objs);
        assert_eq!(pool.in_use(), 0);

        let stats = pool.stats();
        assert_eq!(stats.total_acquired, 8);
        assert_eq!(stats.total_released, 8);
        assert_eq!(stats.peak_in_use, 8);
    }

    #[test]
    fn test_custom_allocator_pool() {
        use std::sync::Arc;

        let pool = Pool::new(
            PoolConfig {
                pool_size: 6,
                shard_count: 3,
                queue_capacity: 8,
            },
            Arc::new(HeapAllocator::new(128)),
        )
        .unwrap();

        assert_eq!(pool.capacity(), 6);
        assert_eq!(pool.shard_acquire_counts().len(), 3);
    }

    #[test]
    fn test_resize() {
        let pool = Pool::with_defaults(16).unwrap();
        pool.grow(8).unwrap();
        assert_eq!(pool.capacity(), 24);
        pool.shrink(12).unwrap();
        assert_eq!(pool.capacity(), 12);
    }
}
