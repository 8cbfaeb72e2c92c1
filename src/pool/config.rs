// src/pool/config.rs
//! Pool construction parameters.

/// Conventional payload size for default pools; pass it to
/// [`Pool::with_defaults`](crate::Pool::with_defaults) when the host
/// has no better number.
pub const DEFAULT_PAYLOAD_SIZE: usize = 64;

/// Sizing parameters for a [`Pool`](crate::Pool).
///
/// `pool_size` objects are spread evenly across `shard_count` shards at
/// creation. The shard count is fixed for the pool's lifetime; the
/// object count changes through [`grow`](crate::Pool::grow) and
/// [`shrink`](crate::Pool::shrink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Total objects constructed at creation. Must be at least 1.
    pub pool_size: usize,
    /// Number of contention-isolation shards, `1..=65535` (the packed
    /// back-pointer reserves 16 bits for the shard id).
    pub shard_count: usize,
    /// Initial capacity of the parked-lease queue. Must be at least 1;
    /// the queue doubles itself when a park finds it full.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 16,
            shard_count: 4,
            queue_capacity: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.shard_count, 4);
        assert_eq!(config.queue_capacity, 32);
    }
}
