// src/pool/stats.rs
//! Aggregated pool statistics.

/// A point-in-time summary of pool activity.
///
/// Produced by [`Pool::stats`](crate::Pool::stats), which walks the
/// shards locking each briefly in turn. Values are consistent per shard
/// but not across shards or against the pool-level gauges; a snapshot
/// taken while leases are in flight is eventually consistent, never
/// atomic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Current total slot count across all shards.
    pub capacity: usize,
    /// Currently leased objects.
    pub in_use: usize,
    /// Highest concurrent lease count ever observed. Never decreases,
    /// even across shrinks.
    pub peak_in_use: usize,
    /// Lifetime successful leases, including parked hand-offs.
    pub total_acquired: u64,
    /// Lifetime returns.
    pub total_released: u64,
    /// Lifetime objects constructed (creation plus completed grows).
    pub total_allocated: u64,
    /// Completed grow operations.
    pub grow_events: u64,
    /// Completed shrink operations.
    pub shrink_events: u64,
    /// Shard-lock acquisitions that had to wait.
    pub contended_lock_acquires: u64,
    /// Total nanoseconds spent waiting on shard locks.
    pub lock_wait_ns: u64,
    /// Parked lease requests currently queued.
    pub parked: usize,
    /// Current parked-queue capacity.
    pub queue_capacity: usize,
    /// Highest queue length ever observed.
    pub queue_peak: usize,
    /// Queue capacity-growth events.
    pub queue_grow_events: u64,
}

impl PoolStats {
    /// Mean nanoseconds spent waiting per contended lock acquisition.
    pub fn average_lock_wait_ns(&self) -> f64 {
        if self.contended_lock_acquires == 0 {
            0.0
        } else {
            self.lock_wait_ns as f64 / self.contended_lock_acquires as f64
        }
    }

    /// Leases still outstanding according to the lifetime counters.
    pub fn outstanding(&self) -> u64 {
        self.total_acquired.saturating_sub(self.total_released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_wait_empty() {
        let stats = PoolStats::default();
        assert_eq!(stats.average_lock_wait_ns(), 0.0);
    }

    #[test]
    fn test_average_wait() {
        let stats = PoolStats {
            contended_lock_acquires: 4,
            lock_wait_ns: 200,
            ..Default::default()
        };
        assert_eq!(stats.average_lock_wait_ns(), 50.0);
    }

    #[test]
    fn test_outstanding() {
        let stats = PoolStats {
            total_acquired: 7,
            total_released: 3,
            ..Default::default()
        };
        assert_eq!(stats.outstanding(), 4);
    }
}
