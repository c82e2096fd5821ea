//! A single `SLAB_SIZE`-aligned page formatted to hold fixed-size objects
//! of one `(object_size, object_align)` pair (spec §3, §4.1).
//!
//! Unlike the teacher's `SegregatedSlab<const SIZE, const N>` (a compile-time
//! size class baked in via const generics), a `Slab` here is formatted at
//! runtime: the spec's allocator registry supports up to 500 distinct
//! `(vmt, size, align)` triples discovered at runtime, so the object size
//! and capacity live in the `Slab`'s own fields rather than in its type.
//!
//! Layout: `vmt` is the struct's first field, so that for any pointer `p`
//! handed out by an allocator, `(p & !(SLAB_SIZE-1))` points to a valid vmt
//! pointer (spec §8, testable property 1).

use super::page::align_up;
use crate::config::SLAB_SIZE;
use crate::sync::packed::{AtomicPacked32, Packed32};
use crate::sync::CachePadded;
use std::cell::Cell;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

const MIN_OBJECTS_PER_SLAB: usize = 2;

/// One formatted slab. Lives at the start of its own `SLAB_SIZE`-aligned
/// page; objects follow immediately after this header/footer.
#[repr(C)]
pub struct Slab {
    /// Type tag copied from the registry entry for this slab's allocator id.
    pub vmt: *const u8,
    owner_thread: AtomicU64,
    object_size: u32,
    object_align: u32,
    capacity: u32,
    slab_index_in_group: u32,
    allocator_id: u32,
    /// Doubly-linked list of slabs a thread owns for one allocator id.
    pub owned_prev: AtomicPtr<Slab>,
    pub owned_next: AtomicPtr<Slab>,
    /// Singly-linked list of a thread's slabs-with-room for one allocator id.
    pub next_free_slab: AtomicPtr<Slab>,
    /// Singly-linked free-slab list within a `SlabGroup`.
    pub next_free_in_group: AtomicPtr<Slab>,
    /// An `Arc<SlabGroup>` this slab's raw page came from, stashed via
    /// `Arc::into_raw` so a formatted slab can still be handed back to its
    /// group once an allocator reclaims it (spec §4.1.4 "return to OS").
    group_token: AtomicPtr<()>,
    /// Owner-only header (spec §3): in-slab offset of the local freelist
    /// head, 0 meaning "none".
    local_freelist_head: Cell<u16>,
    local_inuse: Cell<u16>,
    /// Footer, on its own cache line: the foreign-free LIFO.
    foreign: CachePadded<AtomicPacked32>,
}

// SAFETY: `Slab`'s owner-only fields (`local_freelist_head`, `local_inuse`)
// are only ever touched by whichever single thread currently owns the slab,
// a discipline enforced by the allocator above this type, not by the type
// itself — exactly as in the teacher's `SegregatedSlab`. All other fields
// are already safely Sync primitives.
unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    /// Byte offset of the object area, given the objects' alignment.
    pub fn data_start(object_align: usize) -> usize {
        align_up(std::mem::size_of::<Slab>(), object_align.max(1))
    }

    /// How many `(object_size, object_align)` objects fit in one slab.
    pub fn capacity_for(object_size: usize, object_align: usize) -> usize {
        let align = object_align.max(1);
        let stride = align_up(object_size.max(2), align);
        let start = Self::data_start(align);
        if start >= SLAB_SIZE {
            return 0;
        }
        (SLAB_SIZE - start) / stride
    }

    /// Formats a freshly obtained `SLAB_SIZE` page in place.
    ///
    /// # Safety
    /// `page` must be a writable, `SLAB_SIZE`-aligned, `SLAB_SIZE`-byte
    /// region that nothing else is concurrently using, and
    /// `capacity_for(object_size, object_align) >= 2`.
    pub unsafe fn format(
        page: *mut u8,
        vmt: *const u8,
        object_size: u32,
        object_align: u32,
        allocator_id: u32,
        slab_index_in_group: u32,
        owner_thread: u64,
    ) -> *mut Slab {
        let capacity = Self::capacity_for(object_size as usize, object_align as usize);
        debug_assert!(capacity >= MIN_OBJECTS_PER_SLAB);

        let slab_ptr = page as *mut Slab;
        std::ptr::write(
            slab_ptr,
            Slab {
                vmt,
                owner_thread: AtomicU64::new(owner_thread),
                object_size,
                object_align,
                capacity: capacity as u32,
                slab_index_in_group,
                allocator_id,
                owned_prev: AtomicPtr::new(std::ptr::null_mut()),
                owned_next: AtomicPtr::new(std::ptr::null_mut()),
                next_free_slab: AtomicPtr::new(std::ptr::null_mut()),
                next_free_in_group: AtomicPtr::new(std::ptr::null_mut()),
                group_token: AtomicPtr::new(std::ptr::null_mut()),
                local_freelist_head: Cell::new(0),
                local_inuse: Cell::new(0),
                foreign: CachePadded::new(AtomicPacked32::new(Packed32::NONE)),
            },
        );

        // Thread the in-place object freelist: each free object's first two
        // bytes hold the in-slab offset of the next free object (0 = none).
        let start = Self::data_start(object_align as usize);
        let stride = align_up(object_size as usize, object_align as usize);
        for i in 0..capacity {
            let offset = start + i * stride;
            let next_offset: u16 =
                if i + 1 < capacity { (start + (i + 1) * stride) as u16 } else { 0 };
            (page.add(offset) as *mut u16).write_unaligned(next_offset);
        }
        (*slab_ptr).local_freelist_head.set(start as u16);
        slab_ptr
    }

    /// Recovers the owning slab from a pointer it handed out (spec §8,
    /// testable property 1).
    pub fn from_object_ptr(ptr: *const u8) -> *mut Slab {
        (ptr as usize & !(SLAB_SIZE - 1)) as *mut Slab
    }

    pub fn object_size(&self) -> u32 {
        self.object_size
    }

    pub fn object_align(&self) -> u32 {
        self.object_align
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn allocator_id(&self) -> u32 {
        self.allocator_id
    }

    pub fn slab_index_in_group(&self) -> u32 {
        self.slab_index_in_group
    }

    pub fn owner_thread(&self) -> u64 {
        self.owner_thread.load(Ordering::Acquire)
    }

    pub fn set_owner_thread(&self, id: u64) {
        self.owner_thread.store(id, Ordering::Release);
    }

    pub fn in_use(&self) -> u16 {
        self.local_inuse.get()
    }

    pub fn has_room(&self) -> bool {
        self.local_freelist_head.get() != 0
    }

    pub fn is_full(&self) -> bool {
        !self.has_room()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use() == 0
    }

    /// Stashes the owning `Arc<SlabGroup>` (as a raw pointer) the first time
    /// a slab is formatted from a group's page.
    ///
    /// # Safety
    /// `token` must be a pointer obtained from `Arc::into_raw` and not
    /// already stored/taken on this slab.
    pub unsafe fn set_group_token(&self, token: *mut ()) {
        self.group_token.store(token, Ordering::Release);
    }

    /// Takes back the `Arc<SlabGroup>` raw pointer stashed by
    /// `set_group_token`, leaving `None` behind. Used when an allocator
    /// reclaims an empty slab back to its group.
    pub fn take_group_token(&self) -> Option<*mut ()> {
        let token = self.group_token.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if token.is_null() {
            None
        } else {
            Some(token)
        }
    }

    #[inline]
    fn object_ptr(&self, offset: u16) -> *mut u8 {
        (self as *const Slab as *mut u8).wrapping_add(offset as usize)
    }

    /// Owner-only fast-path allocate (spec §4.1.2). Returns `None` if the
    /// local freelist is empty.
    ///
    /// # Safety
    /// Must only be called by the slab's current owning thread.
    pub unsafe fn alloc_fast(&self) -> Option<*mut u8> {
        let head = self.local_freelist_head.get();
        if head == 0 {
            return None;
        }
        let next = (self.object_ptr(head) as *const u16).read_unaligned();
        self.local_freelist_head.set(next);
        self.local_inuse.set(self.local_inuse.get() + 1);
        Some(self.object_ptr(head))
    }

    /// Owner-only fast-path free (spec §4.1.2). Returns `true` iff the
    /// local freelist transitioned empty -> non-empty.
    ///
    /// # Safety
    /// Must only be called by the slab's current owning thread, with a
    /// pointer this slab previously handed out.
    pub unsafe fn free_fast(&self, ptr: *mut u8) -> bool {
        let offset = (ptr as usize - self as *const Slab as usize) as u16;
        let head = self.local_freelist_head.get();
        let was_empty = head == 0;
        (ptr as *mut u16).write_unaligned(head);
        self.local_freelist_head.set(offset);
        self.local_inuse.set(self.local_inuse.get() - 1);
        was_empty
    }

    /// Cross-thread free (spec §4.1.3): CAS-pushes `ptr` onto the footer's
    /// foreign-free LIFO.
    pub fn free_foreign(&self, ptr: *mut u8) {
        let offset = (ptr as usize - self as *const Slab as usize) as u16;
        let mut current = self.foreign.load(Ordering::Acquire);
        loop {
            unsafe { (self.object_ptr(offset) as *mut u16).write_unaligned(current.offset) };
            let new = Packed32 { offset, count: current.count.wrapping_add(1) };
            match self.foreign.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Owner-only: atomically detaches the foreign-free list and splices it
    /// onto the local freelist. Returns the number of objects reclaimed
    /// (spec §4.1.3).
    ///
    /// # Safety
    /// Must only be called by the slab's current owning thread.
    pub unsafe fn reclaim_foreign(&self) -> u32 {
        let detached = self.foreign.swap(Packed32::NONE, Ordering::AcqRel);
        if detached.offset == 0 {
            return 0;
        }
        let mut count = 0u32;
        let mut cursor = detached.offset;
        loop {
            count += 1;
            let next = (self.object_ptr(cursor) as *const u16).read_unaligned();
            if next == 0 {
                (self.object_ptr(cursor) as *mut u16).write_unaligned(self.local_freelist_head.get());
                break;
            }
            cursor = next;
        }
        self.local_freelist_head.set(detached.offset);
        self.local_inuse.set(self.local_inuse.get().saturating_sub(count as u16));
        count
    }
}
