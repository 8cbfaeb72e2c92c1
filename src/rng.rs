// src/rng.rs
//! Thread-local PRNG for shard selection.
//!
//! Each thread keeps a private 64-bit LCG so concurrent leases start
//! their shard probe at uncorrelated points instead of hammering shard
//! 0. The state is seeded lazily, on a thread's first lease, from the
//! monotonic clock mixed with the thread id; zero doubles as the
//! "not yet seeded" sentinel.

use std::cell::Cell;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::OnceLock;
use std::time::Instant;

// Knuth's MMIX constants; output is the top 32 bits of the state.
const LCG_MULTIPLIER: u64 = 6364136223846793005;
const LCG_INCREMENT: u64 = 1442695040888963407;

thread_local! {
    static SHARD_RNG: Cell<u64> = const { Cell::new(0) };
}

static CLOCK_ANCHOR: OnceLock<Instant> = OnceLock::new();

fn seed() -> u64 {
    let anchor = CLOCK_ANCHOR.get_or_init(Instant::now);
    let ticks = anchor.elapsed().as_nanos() as u64;
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    // Never zero, so a seeded state is always distinguishable.
    (ticks ^ hasher.finish()) | 1
}

/// Advances the calling thread's generator and returns 32 output bits.
pub(crate) fn next_u32() -> u32 {
    SHARD_RNG.with(|state| {
        let mut s = state.get();
        if s == 0 {
            s = seed();
        }
        s = s.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        state.set(s);
        (s >> 32) as u32
    })
}

/// Picks the entry shard for a lease probe.
pub(crate) fn pick_shard(shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    next_u32() as usize % shard_count
}
