//! Append-only item pools with stable addresses under concurrent `alloc`
//! (spec §4.5, component H). Used by the bidirectional index's reverse
//! array and the suffix array's backing ids.
//!
//! `ItemPool` keeps elements in fixed-size chunks reached through a small
//! directory of atomic pointers, in the spirit of the growable, append-only
//! vector designs used across the Rust ecosystem (`append-only-vec`,
//! `boxcar`): a chunk, once allocated, never moves, so a `&T` borrowed from
//! the pool stays valid for the pool's whole lifetime. `ItemPoolFlat` is the
//! single-threaded sibling backed by one contiguous, reallocating buffer.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

type Chunk<T, const CHUNK: usize> = [UnsafeCell<MaybeUninit<T>>; CHUNK];

struct Directory<T, const CHUNK: usize> {
    chunks: Box<[AtomicPtr<Chunk<T, CHUNK>>]>,
}

/// A chunked, append-only pool. `CHUNK` is the number of elements per
/// backing chunk.
pub struct ItemPool<T, const CHUNK: usize> {
    size: AtomicUsize,
    capacity: AtomicUsize,
    directory: AtomicPtr<Directory<T, CHUNK>>,
    grow_lock: Mutex<()>,
    external: AtomicBool,
}

unsafe impl<T: Send, const CHUNK: usize> Send for ItemPool<T, CHUNK> {}
unsafe impl<T: Send, const CHUNK: usize> Sync for ItemPool<T, CHUNK> {}

impl<T, const CHUNK: usize> ItemPool<T, CHUNK> {
    const INITIAL_DIRECTORY_SLOTS: usize = 64;
    /// Growth doubles capacity below this element count, then scales by
    /// 1.5x (spec §4.5).
    const GEOMETRIC_CEILING: usize = 65536;

    /// Creates an empty pool.
    pub fn new() -> Self {
        assert!(CHUNK > 0);
        let chunks = (0..Self::INITIAL_DIRECTORY_SLOTS)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        let dir = Box::into_raw(Box::new(Directory { chunks }));
        Self {
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
            directory: AtomicPtr::new(dir),
            grow_lock: Mutex::new(()),
            external: AtomicBool::new(false),
        }
    }

    /// Number of elements appended so far.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn split(index: usize) -> (usize, usize) {
        (index / CHUNK, index % CHUNK)
    }

    /// Appends `value`, returning its stable index. Never blocks except for
    /// the rare, lock-guarded capacity/directory growth.
    pub fn alloc(&self, value: T) -> usize {
        let index = self.size.fetch_add(1, Ordering::AcqRel);
        self.ensure_capacity(index + 1);
        let (chunk_idx, offset) = Self::split(index);
        let chunk = self.ensure_chunk(chunk_idx);
        unsafe {
            (*chunk)[offset].get().write(MaybeUninit::new(value));
        }
        index
    }

    fn ensure_capacity(&self, needed: usize) {
        if needed <= self.capacity.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.grow_lock.lock().unwrap();
        let cap = self.capacity.load(Ordering::Acquire);
        if needed <= cap {
            return;
        }
        let mut new_cap = if cap == 0 { CHUNK } else if cap < Self::GEOMETRIC_CEILING {
            cap * 2
        } else {
            cap + cap / 2
        };
        new_cap = new_cap.max(needed);
        let needed_slots = new_cap.div_ceil(CHUNK);
        self.ensure_directory_len_locked(needed_slots);
        self.capacity.store(new_cap, Ordering::Release);
    }

    /// Grows the chunk directory. Caller must hold `grow_lock`.
    fn ensure_directory_len_locked(&self, needed_slots: usize) {
        let dir_ptr = self.directory.load(Ordering::Acquire);
        let dir = unsafe { &*dir_ptr };
        if needed_slots <= dir.chunks.len() {
            return;
        }
        let new_len = (dir.chunks.len() * 2).max(needed_slots);
        let new_chunks: Box<[AtomicPtr<Chunk<T, CHUNK>>]> = (0..new_len)
            .map(|i| {
                let existing = dir
                    .chunks
                    .get(i)
                    .map(|s| s.load(Ordering::Acquire))
                    .unwrap_or(ptr::null_mut());
                AtomicPtr::new(existing)
            })
            .collect();
        let new_dir = Box::into_raw(Box::new(Directory { chunks: new_chunks }));
        self.directory.store(new_dir, Ordering::Release);
        // The old directory (just a small array of pointers to the still-live
        // chunks, all of which were copied above) is intentionally leaked:
        // a concurrent reader may still hold a reference to it and this pool
        // has no epoch-based reclamation scheme.
    }

    fn ensure_chunk(&self, chunk_idx: usize) -> *mut Chunk<T, CHUNK> {
        let dir = unsafe { &*self.directory.load(Ordering::Acquire) };
        let slot = &dir.chunks[chunk_idx];
        let existing = slot.load(Ordering::Acquire);
        if !existing.is_null() {
            return existing;
        }
        let fresh: Box<Chunk<T, CHUNK>> =
            Box::new(std::array::from_fn(|_| UnsafeCell::new(MaybeUninit::uninit())));
        let fresh_ptr = Box::into_raw(fresh);
        match slot.compare_exchange(ptr::null_mut(), fresh_ptr, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => fresh_ptr,
            Err(installed) => {
                unsafe { drop(Box::from_raw(fresh_ptr)) };
                installed
            }
        }
    }

    /// Returns the element at `index`.
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> &T {
        assert!(index < self.len(), "ItemPool index out of bounds");
        let (chunk_idx, offset) = Self::split(index);
        let dir = unsafe { &*self.directory.load(Ordering::Acquire) };
        let chunk = dir.chunks[chunk_idx].load(Ordering::Acquire);
        unsafe { (*(*chunk)[offset].get()).assume_init_ref() }
    }

    /// Removes and returns the last element iff `index + 1 == len()` ("pop
    /// last only"); otherwise a no-op that returns `None` (spec §4.5).
    pub fn release(&self, index: usize) -> Option<T> {
        if self
            .size
            .compare_exchange(index + 1, index, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let (chunk_idx, offset) = Self::split(index);
        let dir = unsafe { &*self.directory.load(Ordering::Acquire) };
        let chunk = dir.chunks[chunk_idx].load(Ordering::Acquire);
        Some(unsafe { (*(*chunk)[offset].get()).assume_init_read() })
    }

    /// Points the pool's chunks directly at an externally-owned, contiguous
    /// buffer of `n` elements (e.g. a `memmap2::Mmap`) rather than
    /// heap-allocating chunks. The pool becomes read-only: `alloc`/`release`
    /// on an external pool will corrupt the mapping and must not be called.
    ///
    /// # Safety
    /// `base` must be valid for reads for `n` elements of `T` and must
    /// outlive this pool.
    pub unsafe fn external_buffer(&self, base: *const T, n: usize) {
        let chunks_needed = n.div_ceil(CHUNK).max(1);
        let _guard = self.grow_lock.lock().unwrap();
        self.ensure_directory_len_locked(chunks_needed);
        let dir = &*self.directory.load(Ordering::Acquire);
        for (i, slot) in dir.chunks.iter().enumerate().take(chunks_needed) {
            // SAFETY: `UnsafeCell<MaybeUninit<T>>` is layout-compatible with
            // `T`, so a flat `[T]` buffer can be reinterpreted as chunks of
            // `Chunk<T, CHUNK>` without copying.
            let ptr = (base as *mut T).add(i * CHUNK) as *mut Chunk<T, CHUNK>;
            slot.store(ptr, Ordering::Release);
        }
        self.capacity.store(chunks_needed * CHUNK, Ordering::Release);
        self.size.store(n, Ordering::Release);
        self.external.store(true, Ordering::Release);
    }

    /// Iterates `0..len()` by reference.
    pub fn iter(&self) -> ItemPoolIter<'_, T, CHUNK> {
        ItemPoolIter { pool: self, index: 0 }
    }
}

impl<T, const CHUNK: usize> Default for ItemPool<T, CHUNK> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const CHUNK: usize> Drop for ItemPool<T, CHUNK> {
    fn drop(&mut self) {
        let dir = unsafe { Box::from_raw(self.directory.load(Ordering::Acquire)) };
        if !self.external.load(Ordering::Acquire) {
            let len = self.size.load(Ordering::Acquire);
            for (chunk_idx, slot) in dir.chunks.iter().enumerate() {
                let ptr = slot.load(Ordering::Acquire);
                if ptr.is_null() {
                    continue;
                }
                let base = chunk_idx * CHUNK;
                let chunk = unsafe { &*ptr };
                for (offset, cell) in chunk.iter().enumerate() {
                    if base + offset >= len {
                        break;
                    }
                    unsafe { (*cell.get()).assume_init_drop() };
                }
                unsafe { drop(Box::from_raw(ptr)) };
            }
        }
    }
}

/// A random-access iterator over an [`ItemPool`]'s live elements.
pub struct ItemPoolIter<'a, T, const CHUNK: usize> {
    pool: &'a ItemPool<T, CHUNK>,
    index: usize,
}

impl<'a, T, const CHUNK: usize> Iterator for ItemPoolIter<'a, T, CHUNK> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.index >= self.pool.len() {
            return None;
        }
        let item = self.pool.get(self.index);
        self.index += 1;
        Some(item)
    }
}

/// The single-threaded sibling of [`ItemPool`]: one contiguous,
/// reallocating buffer. Addresses are *not* stable across growth (spec
/// §4.5: "used only from single-threaded contexts").
#[derive(Default)]
pub struct ItemPoolFlat<T> {
    items: Vec<T>,
}

impl<T> ItemPoolFlat<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn alloc(&mut self, value: T) -> usize {
        self.items.push(value);
        self.items.len() - 1
    }

    pub fn release(&mut self, index: usize) -> Option<T> {
        if index + 1 == self.items.len() {
            self.items.pop()
        } else {
            None
        }
    }

    pub fn get(&self, index: usize) -> &T {
        &self.items[index]
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn alloc_and_get() {
        let pool: ItemPool<u64, 4> = ItemPool::new();
        for i in 0..10u64 {
            let idx = pool.alloc(i * 10);
            assert_eq!(*pool.get(idx), i * 10);
        }
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn release_is_pop_last_only() {
        let pool: ItemPool<u64, 4> = ItemPool::new();
        let a = pool.alloc(1);
        let b = pool.alloc(2);
        assert!(pool.release(a).is_none());
        assert_eq!(pool.release(b), Some(2));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn concurrent_alloc_yields_distinct_stable_indices() {
        let pool = Arc::new(ItemPool::<u64, 8>::new());
        const PER_THREAD: u64 = 5000;
        thread::scope(|scope| {
            for t in 0..8 {
                let pool = pool.clone();
                scope.spawn(move || {
                    for i in 0..PER_THREAD {
                        pool.alloc(t * PER_THREAD + i);
                    }
                });
            }
        });
        assert_eq!(pool.len(), 8 * PER_THREAD as usize);
        let mut seen: Vec<u64> = pool.iter().copied().collect();
        seen.sort_unstable();
        let expected: Vec<u64> = (0..8 * PER_THREAD).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn flat_pool_basic() {
        let mut pool: ItemPoolFlat<u32> = ItemPoolFlat::new();
        let a = pool.alloc(1);
        let b = pool.alloc(2);
        assert_eq!(*pool.get(a), 1);
        assert_eq!(pool.release(b), Some(2));
        assert!(pool.release(a).is_some());
        assert!(pool.is_empty());
    }
}
