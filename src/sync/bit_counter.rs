//! Sharded counters (spec §4.1, component F: "Semaphore & bit-counter").
//!
//! A single `AtomicU64` becomes a contention point once enough threads
//! increment it concurrently. `ShardedCounter` spreads increments across a
//! small, cache-padded array of counters keyed by thread id, and sums them
//! lazily on read — the same "pay on read, not on write" trade made by the
//! teacher's `CachePadded`-wrapped atomics throughout `concurrency::sync`.

use crate::sync::CachePadded;
use std::sync::atomic::{AtomicI64, Ordering};

const SHARDS: usize = 16;

/// A counter sharded across a fixed number of cache-padded cells.
pub struct ShardedCounter {
    shards: [CachePadded<AtomicI64>; SHARDS],
}

impl ShardedCounter {
    /// Creates a counter initialized to zero.
    pub const fn new() -> Self {
        // `CachePadded::new` and `AtomicI64::new` are both const.
        const ZERO: CachePadded<AtomicI64> = CachePadded::new(AtomicI64::new(0));
        Self { shards: [ZERO; SHARDS] }
    }

    #[inline]
    fn shard_index() -> usize {
        use std::hash::{Hash, Hasher};
        let id = std::thread::current().id();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() as usize) % SHARDS
    }

    /// Adds `delta` (which may be negative) to the calling thread's shard.
    #[inline]
    pub fn add(&self, delta: i64) {
        self.shards[Self::shard_index()].fetch_add(delta, Ordering::Relaxed);
    }

    /// Sums every shard. Not linearizable with concurrent `add`s, only
    /// eventually consistent, which is the intended use (stats/metrics).
    pub fn sum(&self) -> i64 {
        self.shards.iter().map(|s| s.load(Ordering::Relaxed)).sum()
    }
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}
