//! The append-only registry of `(vmt, object_size, object_align)` triples
//! (spec §4.3, component C), plus each registered id's orphan-slab stack.
//!
//! At most [`crate::config::MAX_ALLOCATOR_TYPES`] distinct allocator types
//! may exist in one process; registering past that bound is the substrate's
//! one genuinely fatal condition (spec §4.1.5, §9) since every `Slab`'s
//! `allocator_id` is a fixed-width index into this table.

use super::slab::Slab;
use crate::config::MAX_ALLOCATOR_TYPES;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// One registered `(vmt, object_size, object_align)` triple and the stack
/// of slabs thread-exit cleanup has orphaned for it.
pub struct AllocatorEntry {
    vmt: *const u8,
    object_size: u32,
    object_align: u32,
    /// Treiber stack of fully- or partially-used slabs abandoned by threads
    /// that exited still owning them (spec §4.1.4: orphan adoption).
    orphan_head: AtomicPtr<Slab>,
}

unsafe impl Send for AllocatorEntry {}
unsafe impl Sync for AllocatorEntry {}

impl AllocatorEntry {
    pub fn vmt(&self) -> *const u8 {
        self.vmt
    }

    pub fn object_size(&self) -> u32 {
        self.object_size
    }

    pub fn object_align(&self) -> u32 {
        self.object_align
    }

    /// Pushes a slab onto this allocator id's orphan stack, linking through
    /// [`Slab::next_free_slab`].
    pub fn push_orphan(&self, slab: *mut Slab) {
        loop {
            let head = self.orphan_head.load(Ordering::Acquire);
            unsafe { (*slab).next_free_slab.store(head, Ordering::Relaxed) };
            if self
                .orphan_head
                .compare_exchange_weak(head, slab, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Pops a slab from this allocator id's orphan stack, for a thread that
    /// found no room in its own per-thread state (spec §4.1.4, step 3).
    pub fn pop_orphan(&self) -> Option<*mut Slab> {
        loop {
            let head = self.orphan_head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let next = unsafe { (*head).next_free_slab.load(Ordering::Relaxed) };
            if self
                .orphan_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(head);
            }
        }
    }
}

/// The append-only `(vmt, size, align)` table (spec §4.3).
pub struct AllocatorRegistry {
    entries: Box<[OnceLock<AllocatorEntry>]>,
    len: AtomicUsize,
}

impl AllocatorRegistry {
    fn new() -> Self {
        Self {
            entries: (0..MAX_ALLOCATOR_TYPES).map(|_| OnceLock::new()).collect(),
            len: AtomicUsize::new(0),
        }
    }

    /// The process-wide registry singleton.
    pub fn global() -> &'static AllocatorRegistry {
        static REGISTRY: OnceLock<AllocatorRegistry> = OnceLock::new();
        REGISTRY.get_or_init(AllocatorRegistry::new)
    }

    /// Finds an existing entry with the same `(vmt, size, align)`, or
    /// registers a new one. Returns the allocator id (an index into this
    /// table).
    ///
    /// # Panics
    /// Panics if more than `MAX_ALLOCATOR_TYPES` distinct triples are
    /// registered in one process (spec §4.1.5: the substrate's sole fatal,
    /// non-recoverable condition).
    pub fn register(&self, vmt: *const u8, object_size: u32, object_align: u32) -> u32 {
        let known = self.len.load(Ordering::Acquire);
        for id in 0..known {
            if let Some(entry) = self.entries[id].get() {
                if entry.vmt == vmt && entry.object_size == object_size && entry.object_align == object_align {
                    return id as u32;
                }
            }
        }

        let id = self.len.fetch_add(1, Ordering::AcqRel);
        assert!(
            id < MAX_ALLOCATOR_TYPES,
            "exceeded MAX_ALLOCATOR_TYPES ({MAX_ALLOCATOR_TYPES}) distinct allocator types"
        );
        let entry = self.entries[id]
            .get_or_init(|| AllocatorEntry {
                vmt,
                object_size,
                object_align,
                orphan_head: AtomicPtr::new(std::ptr::null_mut()),
            });
        debug_assert_eq!(entry.vmt, vmt);
        tracing::info!(id, object_size, object_align, "registered new allocator type");
        id as u32
    }

    /// Looks up an already-registered allocator id's entry.
    pub fn entry(&self, id: u32) -> &AllocatorEntry {
        self.entries[id as usize].get().expect("allocator id must already be registered")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_triple_returns_same_id() {
        let registry = AllocatorRegistry::new();
        let vmt: &'static str = "a";
        let id1 = registry.register(vmt.as_ptr(), 32, 8);
        let id2 = registry.register(vmt.as_ptr(), 32, 8);
        assert_eq!(id1, id2);
    }

    #[test]
    fn distinct_triples_get_distinct_ids() {
        let registry = AllocatorRegistry::new();
        let vmt: &'static str = "b";
        let id1 = registry.register(vmt.as_ptr(), 32, 8);
        let id2 = registry.register(vmt.as_ptr(), 64, 8);
        assert_ne!(id1, id2);
    }

    #[test]
    fn orphan_stack_is_lifo() {
        let registry = AllocatorRegistry::new();
        let vmt: &'static str = "c";
        let id = registry.register(vmt.as_ptr(), 32, 8);
        let entry = registry.entry(id);

        let mut a = std::mem::MaybeUninit::<Slab>::uninit();
        let mut b = std::mem::MaybeUninit::<Slab>::uninit();
        let a_ptr = a.as_mut_ptr();
        let b_ptr = b.as_mut_ptr();
        unsafe {
            (*a_ptr).next_free_slab = AtomicPtr::new(std::ptr::null_mut());
            (*b_ptr).next_free_slab = AtomicPtr::new(std::ptr::null_mut());
        }

        entry.push_orphan(a_ptr);
        entry.push_orphan(b_ptr);
        assert_eq!(entry.pop_orphan(), Some(b_ptr));
        assert_eq!(entry.pop_orphan(), Some(a_ptr));
        assert_eq!(entry.pop_orphan(), None);
    }

    #[test]
    #[should_panic(expected = "exceeded MAX_ALLOCATOR_TYPES")]
    fn exceeding_capacity_panics() {
        let registry = AllocatorRegistry::new();
        for i in 0..=MAX_ALLOCATOR_TYPES {
            let size = 8 + i as u32 * 8;
            registry.register(std::ptr::null(), size, 8);
        }
    }
}
