//! Compile-time configuration (spec §6).
//!
//! These are plain `const`s rather than a build-script-generated config
//! because every value here is a power-of-two arena/queue size that the
//! rest of the crate relies on at the type level (const generics); nothing
//! here needs to vary at runtime.

/// Bytes per slab. Must be a power of two and large enough to hold the
/// slab header/footer plus at least two objects of the largest registered
/// size class.
pub const SLAB_SIZE: usize = 4096;

/// Slabs per `SlabGroup` OS allocation.
pub const SLAB_GROUP_SIZE: usize = 4095;

/// Upper bound on distinct `(tag, size, align)` allocator triples.
pub const MAX_ALLOCATOR_TYPES: usize = 500;

/// Per-thread empty-slab cache low-water mark: below this, `reclaim` keeps
/// handing slabs back to the cache instead of to the `SlabGroup`.
pub const LOCAL_SLABCACHE_LOWWATER: usize = 16;

/// Per-thread empty-slab cache high-water mark: above this, excess empty
/// slabs are returned to their `SlabGroup`.
pub const LOCAL_SLABCACHE_HIGHWATER: usize = 32;

/// Per-worker work-stealing queue capacity. Must be a power of two.
pub const WORKQUEUE_SIZE: usize = 512;

/// `true` when the `single-threaded` feature is enabled, in which case the
/// allocator and queues may assume no concurrent access and downgrade
/// atomics to plain loads/stores. Exposed as a `const` so call sites can
/// `if config::SINGLE_THREADED { ... }` and have the branch optimized away.
pub const SINGLE_THREADED: bool = cfg!(feature = "single-threaded");

const _: () = assert!(SLAB_SIZE.is_power_of_two());
const _: () = assert!(SLAB_GROUP_SIZE > 0);
const _: () = assert!(WORKQUEUE_SIZE.is_power_of_two());
const _: () = assert!(LOCAL_SLABCACHE_LOWWATER < LOCAL_SLABCACHE_HIGHWATER);
