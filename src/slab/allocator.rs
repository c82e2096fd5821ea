//! `Allocator<T>`: the per-type, thread-local front-end over the slab
//! machinery (spec §4.1, component C).
//!
//! Each thread keeps its own list of slabs it owns for a given allocator
//! id, plus a process-wide, per-thread (not per-id) cache of raw
//! unformatted pages so that switching which `T` you allocate doesn't
//! always cost a trip to the `SlabGroup` (spec §4.1.4, acquisition order).

use super::group::{GlobalSlabPool, RawSlab};
use super::registry::AllocatorRegistry;
use super::slab::Slab;
use crate::config::{LOCAL_SLABCACHE_HIGHWATER, LOCAL_SLABCACHE_LOWWATER};
use crate::error::Result;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

thread_local! {
    static THREAD_TAG: Cell<u64> = const { Cell::new(0) };
    static PER_ALLOCATOR: RefCell<Vec<Option<ThreadAllocatorState>>> = RefCell::new(Vec::new());
    static EMPTY_PAGE_CACHE: RefCell<Vec<RawSlab>> = RefCell::new(Vec::new());
}

/// A stable, non-zero tag identifying the calling thread, derived from the
/// address of its own thread-local storage (valid for the thread's
/// lifetime, which is exactly as long as we need it).
fn current_thread_tag() -> u64 {
    THREAD_TAG.with(|cell| {
        let existing = cell.get();
        if existing != 0 {
            return existing;
        }
        let tag = cell as *const Cell<u64> as u64;
        cell.set(tag);
        tag
    })
}

/// One thread's bookkeeping for one allocator id: every slab it owns, and
/// which of those currently have room.
struct ThreadAllocatorState {
    /// Head of the doubly-linked list of all slabs this thread owns for
    /// this allocator id (`Slab::owned_prev`/`owned_next`).
    owned_head: Cell<*mut Slab>,
    /// Head of the singly-linked list of owned slabs with room
    /// (`Slab::next_free_slab`).
    free_head: Cell<*mut Slab>,
}

impl ThreadAllocatorState {
    fn new() -> Self {
        Self { owned_head: Cell::new(std::ptr::null_mut()), free_head: Cell::new(std::ptr::null_mut()) }
    }
}

fn push_owned(ts: &ThreadAllocatorState, slab: *mut Slab) {
    unsafe {
        let head = ts.owned_head.get();
        (*slab).owned_prev.store(std::ptr::null_mut(), Ordering::Relaxed);
        (*slab).owned_next.store(head, Ordering::Relaxed);
        if !head.is_null() {
            (*head).owned_prev.store(slab, Ordering::Relaxed);
        }
    }
    ts.owned_head.set(slab);
}

fn unlink_owned(ts: &ThreadAllocatorState, slab: *mut Slab) {
    unsafe {
        let prev = (*slab).owned_prev.load(Ordering::Relaxed);
        let next = (*slab).owned_next.load(Ordering::Relaxed);
        if prev.is_null() {
            ts.owned_head.set(next);
        } else {
            (*prev).owned_next.store(next, Ordering::Relaxed);
        }
        if !next.is_null() {
            (*next).owned_prev.store(prev, Ordering::Relaxed);
        }
    }
}

fn push_free(ts: &ThreadAllocatorState, slab: *mut Slab) {
    unsafe { (*slab).next_free_slab.store(ts.free_head.get(), Ordering::Relaxed) };
    ts.free_head.set(slab);
}

fn pop_empty_page() -> Option<RawSlab> {
    EMPTY_PAGE_CACHE.with(|cache| cache.borrow_mut().pop())
}

fn push_empty_page(raw: RawSlab) {
    EMPTY_PAGE_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.push(raw);
        if cache.len() > LOCAL_SLABCACHE_HIGHWATER {
            while cache.len() > LOCAL_SLABCACHE_LOWWATER {
                let excess = cache.pop().expect("just checked len > lowwater >= 0");
                GlobalSlabPool::global().release_slab(excess);
            }
        }
    });
}

/// A handle to one `(T, alignment)` size class's slabs, registered once
/// and cheaply cloned/shared across threads (it is just an id).
pub struct Allocator<T> {
    id: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Allocator<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Allocator<T> {}

impl<T> Default for Allocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Allocator<T> {
    /// Registers (or finds) the allocator id for `T`, per spec §4.3.
    pub fn new() -> Self {
        // `type_name`'s backing bytes live for the process's lifetime, so
        // its address makes a stable, valid `*const u8` tag per type
        // (spec §9: the registry only needs a stable tag, not true
        // type-level uniqueness -- the allocator id is the real key).
        let vmt = std::any::type_name::<T>().as_ptr();
        let object_size = std::mem::size_of::<T>().max(2) as u32;
        let object_align = std::mem::align_of::<T>().max(1) as u32;
        let id = AllocatorRegistry::global().register(vmt, object_size, object_align);
        Self { id, _marker: PhantomData }
    }

    fn with_state<R>(&self, f: impl FnOnce(&ThreadAllocatorState) -> R) -> R {
        PER_ALLOCATOR.with(|cell| {
            let mut table = cell.borrow_mut();
            if table.len() <= self.id as usize {
                table.resize_with(self.id as usize + 1, || None);
            }
            let slot = table[self.id as usize].get_or_insert_with(ThreadAllocatorState::new);
            f(slot)
        })
    }

    fn format(&self, ts: &ThreadAllocatorState, raw: RawSlab) -> *mut Slab {
        let entry = AllocatorRegistry::global().entry(self.id);
        let slab = unsafe {
            Slab::format(
                raw.ptr,
                entry.vmt(),
                entry.object_size(),
                entry.object_align(),
                self.id,
                raw.index_in_group,
                current_thread_tag(),
            )
        };
        let token = Arc::into_raw(raw.group) as *mut ();
        unsafe { (*slab).set_group_token(token) };
        push_owned(ts, slab);
        slab
    }

    /// Scans owned slabs for ones with pending foreign frees, reclaiming
    /// the first one that has any (spec §4.1.4, acquisition step 1).
    fn reclaim_any_foreign(&self, ts: &ThreadAllocatorState) -> bool {
        let mut cursor = ts.owned_head.get();
        while !cursor.is_null() {
            let slab = unsafe { &*cursor };
            let next = slab.owned_next.load(Ordering::Relaxed);
            if slab.is_full() && unsafe { slab.reclaim_foreign() } > 0 {
                push_free(ts, cursor);
                return true;
            }
            cursor = next;
        }
        false
    }

    /// Allocates one `T`-sized, `T`-aligned object (spec §4.1.1/§4.1.4).
    ///
    /// Never blocks. Fails only by propagating the OS's refusal to hand out
    /// a fresh slab group (spec §4.1.5, §7 `OutOfMemory`): a recoverable
    /// condition returned to the caller, not a panic.
    pub fn allocate(&self) -> Result<*mut T> {
        self.with_state(|ts| loop {
            let mut prev: *mut Slab = std::ptr::null_mut();
            let mut cursor = ts.free_head.get();
            while !cursor.is_null() {
                let slab = unsafe { &*cursor };
                let next = slab.next_free_slab.load(Ordering::Relaxed);
                if let Some(ptr) = unsafe { slab.alloc_fast() } {
                    if slab.is_full() {
                        if prev.is_null() {
                            ts.free_head.set(next);
                        } else {
                            unsafe { (*prev).next_free_slab.store(next, Ordering::Relaxed) };
                        }
                    }
                    return Ok(ptr as *mut T);
                }
                prev = cursor;
                cursor = next;
            }

            if self.reclaim_any_foreign(ts) {
                continue;
            }

            if let Some(raw) = pop_empty_page() {
                let slab = self.format(ts, raw);
                push_free(ts, slab);
                continue;
            }

            let entry = AllocatorRegistry::global().entry(self.id);
            if let Some(orphan) = entry.pop_orphan() {
                unsafe { (*orphan).set_owner_thread(current_thread_tag()) };
                push_owned(ts, orphan);
                if unsafe { (*orphan).has_room() } {
                    push_free(ts, orphan);
                }
                continue;
            }

            let raw = GlobalSlabPool::global().allocate_slab()?;
            let slab = self.format(ts, raw);
            push_free(ts, slab);
        })
    }

    /// Releases a previously allocated object (spec §4.1.2/§4.1.3): the
    /// owner's fast path if called from the owning thread, the CAS-based
    /// foreign path otherwise.
    ///
    /// # Safety
    /// `ptr` must have come from this same `Allocator`'s `allocate` and not
    /// already be released.
    pub unsafe fn release(&self, ptr: *mut T) {
        let slab_ptr = Slab::from_object_ptr(ptr as *const u8);
        let slab = &*slab_ptr;
        if slab.owner_thread() == current_thread_tag() {
            let became_usable = slab.free_fast(ptr as *mut u8);
            if became_usable {
                self.with_state(|ts| push_free(ts, slab_ptr));
            }
        } else {
            slab.free_foreign(ptr as *mut u8);
        }
    }

    /// Gives back empty owned slabs to the per-thread empty-page cache
    /// (spec §4.1.4). When `keep_one` is set, one empty slab is kept ready
    /// for immediate reuse.
    pub fn reclaim(&self, keep_one: bool) {
        self.with_state(|ts| {
            let mut kept_one = false;
            let mut prev: *mut Slab = std::ptr::null_mut();
            let mut cursor = ts.free_head.get();
            let mut to_release = Vec::new();
            while !cursor.is_null() {
                let slab = unsafe { &*cursor };
                let next = slab.next_free_slab.load(Ordering::Relaxed);
                if slab.is_empty() && !(keep_one && !kept_one) {
                    if prev.is_null() {
                        ts.free_head.set(next);
                    } else {
                        unsafe { (*prev).next_free_slab.store(next, Ordering::Relaxed) };
                    }
                    unlink_owned(ts, cursor);
                    to_release.push(cursor);
                    cursor = next;
                    continue;
                }
                if slab.is_empty() {
                    kept_one = true;
                }
                prev = cursor;
                cursor = next;
            }

            for slab_ptr in to_release {
                let slab = unsafe { &*slab_ptr };
                let token = slab.take_group_token().expect("formatted slab must carry a group token");
                let group = unsafe { Arc::from_raw(token as *const super::group::SlabGroup) };
                let raw = RawSlab { ptr: slab_ptr as *mut u8, group, index_in_group: slab.slab_index_in_group() };
                push_empty_page(raw);
            }
        });
    }

    /// Process-wide opportunistic shrink: releases fully-unused
    /// `SlabGroup`s back to the OS (spec §4.2 `reclaim`). Cheap to call
    /// periodically; does nothing if there is nothing to shrink.
    pub fn gc() {
        GlobalSlabPool::global().reclaim();
    }

    /// Called when a thread is about to exit (or whenever the caller wants
    /// to give up a thread's slab ownership early): orphans every slab the
    /// calling thread still owns, across every allocator id, and flushes
    /// its empty-page cache back to the global pool (spec §4.1.4 "thread
    /// exit"). Not specific to `T` -- every `Allocator<_>` shares the same
    /// thread-local bookkeeping.
    pub fn thread_cleanup() {
        PER_ALLOCATOR.with(|cell| {
            let mut table = cell.borrow_mut();
            for (id, slot) in table.iter_mut().enumerate() {
                if let Some(ts) = slot.take() {
                    let entry = AllocatorRegistry::global().entry(id as u32);
                    let mut cursor = ts.owned_head.get();
                    while !cursor.is_null() {
                        let next = unsafe { (*cursor).owned_next.load(Ordering::Relaxed) };
                        entry.push_orphan(cursor);
                        cursor = next;
                    }
                }
            }
        });
        EMPTY_PAGE_CACHE.with(|cache| {
            for raw in cache.borrow_mut().drain(..) {
                GlobalSlabPool::global().release_slab(raw);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;

    #[test]
    fn allocate_and_release_roundtrip() {
        let alloc: Allocator<u64> = Allocator::new();
        let ptr = alloc.allocate().unwrap();
        unsafe {
            *ptr = 42;
            assert_eq!(*ptr, 42);
            alloc.release(ptr);
        }
    }

    #[test]
    fn reuses_released_slots() {
        let alloc: Allocator<[u8; 64]> = Allocator::new();
        let a = alloc.allocate().unwrap();
        unsafe { alloc.release(a) };
        let b = alloc.allocate().unwrap();
        assert_eq!(a, b);
        unsafe { alloc.release(b) };
    }

    #[test]
    fn many_allocations_yield_distinct_pointers() {
        let alloc: Allocator<u32> = Allocator::new();
        let mut ptrs = Vec::new();
        for i in 0..5000u32 {
            let p = alloc.allocate().unwrap();
            unsafe { *p = i };
            ptrs.push(p);
        }
        let mut unique: Vec<_> = ptrs.iter().map(|p| *p as usize).collect();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), ptrs.len());
        for p in ptrs {
            unsafe { alloc.release(p) };
        }
    }

    #[test]
    fn cross_thread_free_uses_foreign_path() {
        let alloc: Allocator<u64> = Allocator::new();
        let counter = StdArc::new(AtomicUsize::new(0));
        let ptr = alloc.allocate().unwrap() as usize;

        let alloc2 = alloc;
        let counter2 = counter.clone();
        let handle = std::thread::spawn(move || {
            unsafe { alloc2.release(ptr as *mut u64) };
            counter2.fetch_add(1, Ordering::SeqCst);
        });
        handle.join().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Owner thread reclaims the foreign free via its normal fast path.
        let reclaimed = alloc.allocate().unwrap();
        assert_eq!(reclaimed as usize, ptr);
        unsafe { alloc.release(reclaimed) };
    }

    #[test]
    fn reclaim_returns_empty_slabs_to_cache() {
        let alloc: Allocator<u64> = Allocator::new();
        let ptrs: Vec<_> = (0..64).map(|_| alloc.allocate().unwrap()).collect();
        for p in ptrs {
            unsafe { alloc.release(p) };
        }
        alloc.reclaim(false);
        // Allocating again should work, whether from a cached page or the
        // global pool.
        let p = alloc.allocate().unwrap();
        unsafe { alloc.release(p) };
    }

    #[test]
    fn allocate_returns_result() {
        let alloc: Allocator<u64> = Allocator::new();
        let ptr: Result<*mut u64> = alloc.allocate();
        unsafe { alloc.release(ptr.unwrap()) };
    }
}
