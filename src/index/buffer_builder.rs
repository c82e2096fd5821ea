//! `BufferBuilder<T>`: an append-only dynamic array with amortised O(1)
//! growth, plus a lock-protected variant for parallel construction (spec
//! §4.7).

use crate::error::{Error, Result};
use crate::io::format::{check_signature, check_size, save_atomically, signature, SIGNATURE_LEN};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;
use zerocopy::{AsBytes, FromBytes};

const SIGNATURE: [u8; SIGNATURE_LEN] = signature(b"\x7FBufBuild");

/// A single-threaded, append-only `Vec<T>` wrapper matching the spec's
/// `BufferBuilder` contract.
#[derive(Debug, Clone)]
pub struct BufferBuilder<T> {
    data: Vec<T>,
}

impl<T> Default for BufferBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BufferBuilder<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: Vec::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn append(&mut self, value: T) -> usize {
        let index = self.data.len();
        self.data.push(value);
        index
    }

    pub fn reserve(&mut self, additional: usize) {
        self.data.reserve(additional);
    }

    pub fn set_element(&mut self, index: usize, value: T) {
        self.data[index] = value;
    }

    pub fn reverse(&mut self) {
        self.data.reverse();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Hands off ownership of the built buffer (spec `finalize`/`move`).
    pub fn finalize(self) -> Vec<T> {
        self.data
    }
}

impl<T: Default + Clone> BufferBuilder<T> {
    /// Atomically (within this single-threaded builder, just amortised)
    /// reserves `count` fresh slots and returns the first index, for
    /// callers that fill elements out of order via `set_element`.
    pub fn reserve_elements(&mut self, count: usize) -> usize {
        let first = self.data.len();
        self.data.resize(first + count, T::default());
        first
    }
}

impl<T: AsBytes> BufferBuilder<T> {
    /// Persists the buffer (spec §6: signature, 1-byte element size, u64
    /// count, then the raw little-endian elements).
    pub fn save(&self, path: &Path) -> Result<()> {
        save_atomically(path, |file| {
            file.write_all(&SIGNATURE)?;
            file.write_all(&[std::mem::size_of::<T>() as u8])?;
            file.write_all(&(self.data.len() as u64).to_le_bytes())?;
            file.write_all(self.data.as_slice().as_bytes())?;
            Ok(())
        })
    }
}

impl<T: FromBytes + Clone> BufferBuilder<T> {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut header = [0u8; SIGNATURE_LEN + 1 + 8];
        file.read_exact(&mut header)?;
        check_signature(&header[..SIGNATURE_LEN], &SIGNATURE)?;
        check_size(header[SIGNATURE_LEN] as usize, std::mem::size_of::<T>())?;
        let count =
            u64::from_le_bytes(header[SIGNATURE_LEN + 1..].try_into().unwrap()) as usize;

        let mut bytes = vec![0u8; count * std::mem::size_of::<T>()];
        file.read_exact(&mut bytes)?;
        let slice: &[T] =
            zerocopy::LayoutVerified::new_slice(bytes.as_slice()).ok_or(Error::BadFormat)?.into_slice();
        Ok(Self { data: slice.to_vec() })
    }
}

/// A read-only, zero-copy view of a saved buffer, borrowed straight out of
/// a memory-mapped file (spec §4.7 `loadFromMmap`).
pub struct MmappedBuffer<T> {
    mmap: memmap2::Mmap,
    offset: usize,
    len: usize,
    _marker: std::marker::PhantomData<T>,
}

unsafe impl<T: Send> Send for MmappedBuffer<T> {}
unsafe impl<T: Sync> Sync for MmappedBuffer<T> {}

impl<T: FromBytes> MmappedBuffer<T> {
    pub fn load(path: &Path) -> Result<Self> {
        let mmap = crate::io::format::mmap_readonly(path)?;
        check_signature(&mmap[..SIGNATURE_LEN], &SIGNATURE)?;
        check_size(mmap[SIGNATURE_LEN] as usize, std::mem::size_of::<T>())?;
        let count_bytes: [u8; 8] = mmap[SIGNATURE_LEN + 1..SIGNATURE_LEN + 9].try_into().unwrap();
        let count = u64::from_le_bytes(count_bytes) as usize;
        let offset = SIGNATURE_LEN + 9;
        let needed = offset + count * std::mem::size_of::<T>();
        if mmap.len() < needed {
            return Err(Error::BadFormat);
        }
        Ok(Self { mmap, offset, len: count, _marker: std::marker::PhantomData })
    }

    pub fn as_slice(&self) -> &[T] {
        let bytes = &self.mmap[self.offset..self.offset + self.len * std::mem::size_of::<T>()];
        zerocopy::LayoutVerified::new_slice(bytes).expect("validated at load time").into_slice()
    }
}

/// A lock-protected variant for building a buffer from multiple threads
/// (spec §4.7: "parallel and concurrent subclasses add a lock over the
/// resize-sensitive operations without changing the contract").
///
/// `reserve_elements` is the only resize-sensitive operation and is taken
/// under `grow_lock`; the subsequent `set_element` writes go through a raw
/// pointer into already-reserved, disjoint slots -- the same
/// reserve-then-write-without-a-lock pattern as
/// [`crate::pool::thread_pool::ThreadPool::parallelize_map`].
pub struct ConcurrentBufferBuilder<T> {
    ptr: AtomicPtr<T>,
    capacity: AtomicUsize,
    len: AtomicUsize,
    grow_lock: Mutex<()>,
}

unsafe impl<T: Send> Send for ConcurrentBufferBuilder<T> {}
unsafe impl<T: Send> Sync for ConcurrentBufferBuilder<T> {}

impl<T> Default for ConcurrentBufferBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentBufferBuilder<T> {
    pub fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            capacity: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically reserves `count` slots, growing the backing allocation
    /// under `grow_lock` if needed, and returns the first index.
    pub fn reserve_elements(&self, count: usize) -> usize {
        let first = self.len.fetch_add(count, Ordering::AcqRel);
        let needed = first + count;
        if needed > self.capacity.load(Ordering::Acquire) {
            self.grow_to(needed);
        }
        first
    }

    fn grow_to(&self, needed: usize) {
        let _guard = self.grow_lock.lock().expect("grow lock poisoned");
        let mut capacity = self.capacity.load(Ordering::Acquire);
        if capacity >= needed {
            return;
        }
        let new_capacity = needed.max(capacity * 2).max(16);
        let new_layout = std::alloc::Layout::array::<T>(new_capacity).expect("capacity overflow");
        let new_ptr = unsafe { std::alloc::alloc(new_layout) } as *mut T;
        assert!(!new_ptr.is_null(), "out of memory growing ConcurrentBufferBuilder");

        let old_ptr = self.ptr.load(Ordering::Acquire);
        if !old_ptr.is_null() {
            unsafe { std::ptr::copy_nonoverlapping(old_ptr, new_ptr, capacity) };
            let old_layout = std::alloc::Layout::array::<T>(capacity).unwrap();
            unsafe { std::alloc::dealloc(old_ptr as *mut u8, old_layout) };
        }
        self.ptr.store(new_ptr, Ordering::Release);
        capacity = new_capacity;
        self.capacity.store(capacity, Ordering::Release);
    }

    /// Writes `value` into a slot previously returned by `reserve_elements`.
    ///
    /// # Safety
    /// `index` must have been returned by `reserve_elements` on this
    /// builder and not already written by a racing call for the same
    /// index.
    pub unsafe fn set_element(&self, index: usize, value: T) {
        let ptr = self.ptr.load(Ordering::Acquire);
        ptr.add(index).write(value);
    }

    /// Consumes the builder into an owned `Vec<T>`.
    pub fn finalize(self) -> Vec<T> {
        let len = self.len.load(Ordering::Acquire);
        let capacity = self.capacity.load(Ordering::Acquire);
        let ptr = self.ptr.swap(std::ptr::null_mut(), Ordering::AcqRel);
        std::mem::forget(self);
        if ptr.is_null() {
            return Vec::new();
        }
        unsafe { Vec::from_raw_parts(ptr, len, capacity) }
    }
}

impl<T> Drop for ConcurrentBufferBuilder<T> {
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            return;
        }
        let len = self.len.load(Ordering::Acquire);
        let capacity = self.capacity.load(Ordering::Acquire);
        unsafe {
            std::ptr::drop_in_place(std::slice::from_raw_parts_mut(ptr, len));
            let layout = std::alloc::Layout::array::<T>(capacity).unwrap();
            std::alloc::dealloc(ptr as *mut u8, layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_and_finalize() {
        let mut builder = BufferBuilder::new();
        builder.append(1u32);
        builder.append(2);
        builder.append(3);
        assert_eq!(builder.finalize(), vec![1, 2, 3]);
    }

    #[test]
    fn reverse_in_place() {
        let mut builder = BufferBuilder::new();
        for i in 0..5u32 {
            builder.append(i);
        }
        builder.reverse();
        assert_eq!(builder.finalize(), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn reserve_elements_then_set_out_of_order() {
        let mut builder: BufferBuilder<u32> = BufferBuilder::new();
        let first = builder.reserve_elements(3);
        builder.set_element(first + 2, 30);
        builder.set_element(first, 10);
        builder.set_element(first + 1, 20);
        assert_eq!(builder.finalize(), vec![10, 20, 30]);
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut builder: BufferBuilder<u32> = BufferBuilder::new();
        for i in 0..100u32 {
            builder.append(i);
        }
        let dir = std::env::temp_dir()
            .join(format!("bufbuild-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("buf.bin");
        builder.save(&path).unwrap();

        let loaded: BufferBuilder<u32> = BufferBuilder::load(&path).unwrap();
        assert_eq!(loaded.as_slice(), (0..100u32).collect::<Vec<_>>().as_slice());

        let mmapped: MmappedBuffer<u32> = MmappedBuffer::load(&path).unwrap();
        assert_eq!(mmapped.as_slice(), (0..100u32).collect::<Vec<_>>().as_slice());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn concurrent_builder_reserves_disjoint_ranges() {
        let builder = Arc::new(ConcurrentBufferBuilder::<u32>::new());
        let mut handles = Vec::new();
        for t in 0..8u32 {
            let builder = builder.clone();
            handles.push(std::thread::spawn(move || {
                let first = builder.reserve_elements(100);
                for i in 0..100u32 {
                    unsafe { builder.set_element(first + i as usize, t * 100 + i) };
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let builder = Arc::try_unwrap(builder).unwrap();
        let mut values = builder.finalize();
        values.sort_unstable();
        let expected: Vec<u32> = (0..800).collect();
        assert_eq!(values, expected);
    }
}
