//! Atomic primitives and blocking building blocks (spec §4.1 component A,
//! component F).
//!
//! Everything non-blocking in this crate is built from the std atomics
//! directly (they are already the "typed atomic wrappers" spec component A
//! asks for — Rust doesn't need a branding layer to get that). What this
//! module adds on top is the small amount of policy the spec pins down:
//! the packed 16+16 word used by the slab footer, the backoff policies used
//! at the handful of blocking points spec §5 enumerates, and the semaphore
//! and sharded counter used by the worker pool.

pub mod backoff;
pub mod cache_padded;
pub mod packed;
pub mod semaphore;
pub mod bit_counter;

pub use cache_padded::CachePadded;
pub use packed::Packed32;
pub use semaphore::Semaphore;
pub use bit_counter::ShardedCounter;
