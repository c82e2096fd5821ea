//! The slab allocator (spec §4.1-§4.3, components B and C): aligned
//! fixed-size pages (`slab`), the OS-backed pool of pages grouped into
//! `SlabGroup`s (`group`), the append-only `(vmt, size, align)` registry
//! (`registry`), and the per-type, thread-local front-end (`allocator`).

pub mod page;
pub mod slab;
pub mod group;
pub mod registry;
pub mod allocator;

pub use allocator::Allocator;
pub use slab::Slab;
