//! `SlabGroup`: an OS-backed allocation of `SLAB_GROUP_SIZE` contiguous
//! slabs, and the global MPMC pool of groups that have spare slabs (spec
//! §4.2, component B).

use super::page::{PageAlloc, SystemPageAlloc};
use crate::config::{SLAB_GROUP_SIZE, SLAB_SIZE};
use crate::error::{Error, Result};
use crate::queue::BoundedMpmcQueue;
use crate::sync::backoff::CriticalSectionBackoff;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// A raw, unformatted slab-sized block handed out by a [`SlabGroup`].
/// Formatting it for a particular `(object_size, object_align)` is the
/// allocator's job (spec §4.1.4: "the chosen slab is formatted").
pub struct RawSlab {
    pub ptr: *mut u8,
    pub group: Arc<SlabGroup>,
    pub index_in_group: u32,
}

unsafe impl Send for RawSlab {}

/// A contiguous, `SLAB_SIZE`-aligned OS allocation of `SLAB_GROUP_SIZE`
/// slabs, with a lock-free stack of the ones currently free.
pub struct SlabGroup {
    base: *mut u8,
    free_head: AtomicPtr<u8>,
    free_count: AtomicUsize,
}

unsafe impl Send for SlabGroup {}
unsafe impl Sync for SlabGroup {}

impl SlabGroup {
    fn new() -> Result<Arc<Self>> {
        let base = SystemPageAlloc.alloc_pages(SLAB_GROUP_SIZE);
        if base.is_null() {
            tracing::debug!(slabs = SLAB_GROUP_SIZE, "OS refused a new slab group allocation");
            return Err(Error::OutOfMemory);
        }
        tracing::debug!(base = ?base, slabs = SLAB_GROUP_SIZE, "acquired new slab group from the OS");
        // Thread every slab's first machine word into a singly-linked free
        // stack; the last slab terminates the chain with null.
        for i in 0..SLAB_GROUP_SIZE {
            let slab_ptr = unsafe { base.add(i * SLAB_SIZE) };
            let next = if i + 1 < SLAB_GROUP_SIZE {
                unsafe { base.add((i + 1) * SLAB_SIZE) }
            } else {
                std::ptr::null_mut()
            };
            unsafe { (slab_ptr as *mut *mut u8).write(next) };
        }
        Ok(Arc::new(Self {
            base,
            free_head: AtomicPtr::new(base),
            free_count: AtomicUsize::new(SLAB_GROUP_SIZE),
        }))
    }

    /// Number of free (unformatted/returned) slabs currently in this group.
    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    fn slab_index(&self, ptr: *mut u8) -> u32 {
        ((ptr as usize - self.base as usize) / SLAB_SIZE) as u32
    }

    fn pop_free(&self) -> Option<*mut u8> {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let next = unsafe { (head as *const *mut u8).read() };
            if self
                .free_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.free_count.fetch_sub(1, Ordering::AcqRel);
                return Some(head);
            }
        }
    }

    fn push_free(&self, ptr: *mut u8) {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            unsafe { (ptr as *mut *mut u8).write(head) };
            if self
                .free_head
                .compare_exchange_weak(head, ptr, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.free_count.fetch_add(1, Ordering::AcqRel);
                return;
            }
        }
    }
}

impl Drop for SlabGroup {
    fn drop(&mut self) {
        tracing::debug!(base = ?self.base, slabs = SLAB_GROUP_SIZE, "returning fully-unused slab group to the OS");
        unsafe { SystemPageAlloc.dealloc_pages(self.base, SLAB_GROUP_SIZE) };
    }
}

/// Capacity of the global queue of groups-with-free-slabs. A generous,
/// fixed bound (spec §4.4.1 describes this as the same bounded MPMC queue
/// used elsewhere, not an unbounded structure).
const GROUP_QUEUE_CAPACITY: usize = 1 << 16;

/// The process-wide pool of `SlabGroup`s (spec §4.2).
pub struct GlobalSlabPool {
    groups: BoundedMpmcQueue<Arc<SlabGroup>>,
    /// Approximate count of live groups, used only to bound `reclaim`'s
    /// wrap-around scan.
    group_count: AtomicUsize,
}

impl GlobalSlabPool {
    pub fn new() -> Self {
        Self {
            groups: BoundedMpmcQueue::new(GROUP_QUEUE_CAPACITY),
            group_count: AtomicUsize::new(0),
        }
    }

    /// Obtains one raw, unformatted slab (spec §4.2 `allocateSlab`).
    pub fn allocate_slab(&self) -> Result<RawSlab> {
        let mut backoff = CriticalSectionBackoff::new();
        loop {
            match self.groups.try_pop() {
                Some(group) => {
                    if group.free_count() == SLAB_GROUP_SIZE {
                        // Fully unused. If another group is available,
                        // prefer consolidating onto it and return this one
                        // to the OS instead of using it.
                        if let Some(other) = self.groups.try_pop() {
                            self.group_count.fetch_sub(1, Ordering::Relaxed);
                            drop(group);
                            let _ = self.groups.try_push(other.clone());
                            drop(other);
                            continue;
                        }
                    }
                    if let Some(slab_ptr) = group.pop_free() {
                        let idx = group.slab_index(slab_ptr);
                        if group.free_count() > 0 {
                            let _ = self.groups.try_push(group.clone());
                        }
                        return Ok(RawSlab { ptr: slab_ptr, group, index_in_group: idx });
                    }
                    // Lost a race for the last slab; try again.
                    backoff.spin();
                }
                None => {
                    let group = SlabGroup::new()?;
                    self.group_count.fetch_add(1, Ordering::Relaxed);
                    let slab_ptr = group.pop_free().expect("freshly created group has free slabs");
                    let idx = group.slab_index(slab_ptr);
                    if group.free_count() > 0 {
                        let _ = self.groups.try_push(group.clone());
                    }
                    return Ok(RawSlab { ptr: slab_ptr, group, index_in_group: idx });
                }
            }
        }
    }

    /// Returns a raw slab to its group (spec §4.2 `releaseSlab`).
    pub fn release_slab(&self, raw: RawSlab) {
        let was_exhausted = raw.group.free_count() == 0;
        raw.group.push_free(raw.ptr);
        if was_exhausted {
            let _ = self.groups.try_push(raw.group);
        }
    }

    /// Opportunistic shrink: scans up to one full cycle of the group queue,
    /// releasing any fully-unused group back to the OS (spec §4.2
    /// `reclaim`). This is the only path by which slab memory returns to
    /// the OS.
    pub fn reclaim(&self) {
        let n = self.group_count.load(Ordering::Relaxed);
        let mut first: Option<*const SlabGroup> = None;
        for _ in 0..n {
            let Some(group) = self.groups.try_pop() else { break };
            let identity = Arc::as_ptr(&group);
            match first {
                None => first = Some(identity),
                Some(f) if f == identity => {
                    let _ = self.groups.try_push(group);
                    break;
                }
                _ => {}
            }
            if group.free_count() == SLAB_GROUP_SIZE {
                self.group_count.fetch_sub(1, Ordering::Relaxed);
                drop(group);
            } else {
                let _ = self.groups.try_push(group);
            }
        }
    }

    /// Total number of groups tracked by the pool (enqueued or momentarily
    /// held by a caller mid-operation). Exposed for tests.
    pub fn group_count(&self) -> usize {
        self.group_count.load(Ordering::Relaxed)
    }

    /// The process-wide pool singleton.
    pub fn global() -> &'static GlobalSlabPool {
        static POOL: OnceLock<GlobalSlabPool> = OnceLock::new();
        POOL.get_or_init(GlobalSlabPool::new)
    }
}

impl Default for GlobalSlabPool {
    fn default() -> Self {
        Self::new()
    }
}
