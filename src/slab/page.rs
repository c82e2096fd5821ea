//! Page-granularity OS memory, grounded on the teacher's `PageAlloc` trait
//! (same interface, generalised from a fixed 4 KiB `PAGE_SIZE` constant to
//! spec's configurable, runtime-checked `config::SLAB_SIZE`) and on the
//! teacher's per-platform `allocator::syscall::{unix,windows}` modules for
//! the actual page acquisition (`examples/ryancinsight-halo/src/allocator/
//! syscall/{unix,windows}.rs`): direct `mmap`/`VirtualAlloc`, not the global
//! allocator, since slabs need to be reclaimable to the OS independently of
//! Rust's allocator and naturally aligned to `SLAB_SIZE`.

use crate::config::SLAB_SIZE;

/// Rounds `value` up to the next multiple of `align` (`align` must be a
/// power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Allocates and deallocates `SLAB_SIZE`-aligned, `SLAB_SIZE`-sized pages.
///
/// A trait (rather than a single hard-coded function) so tests can swap in
/// an allocator that tracks outstanding pages, matching the teacher's
/// `PageAlloc` abstraction over the per-platform syscall layer.
pub trait PageAlloc: Send + Sync {
    /// Allocates one `SLAB_SIZE`-aligned page. Returns null on OS failure.
    fn alloc_page(&self) -> *mut u8;

    /// Allocates `count` contiguous `SLAB_SIZE`-aligned pages as a single
    /// OS allocation (used for `SlabGroup`). Returns null on OS failure.
    fn alloc_pages(&self, count: usize) -> *mut u8;

    /// Deallocates a region obtained from `alloc_page`/`alloc_pages`.
    ///
    /// # Safety
    /// `ptr` must have come from this allocator with the same `count`.
    unsafe fn dealloc_pages(&self, ptr: *mut u8, count: usize);
}

/// The default [`PageAlloc`]: direct OS page-mapping syscalls (`mmap` on
/// Unix, `VirtualAlloc` on Windows), requesting `SLAB_SIZE`-aligned,
/// `SLAB_SIZE`-sized regions.
#[derive(Default, Clone, Copy, Debug)]
pub struct SystemPageAlloc;

impl PageAlloc for SystemPageAlloc {
    fn alloc_page(&self) -> *mut u8 {
        self.alloc_pages(1)
    }

    fn alloc_pages(&self, count: usize) -> *mut u8 {
        sys::alloc_pages(SLAB_SIZE * count)
    }

    unsafe fn dealloc_pages(&self, ptr: *mut u8, count: usize) {
        sys::dealloc_pages(ptr, SLAB_SIZE * count);
    }
}

#[cfg(unix)]
mod sys {
    //! Mirrors `examples/ryancinsight-halo/src/allocator/syscall/unix.rs`:
    //! anonymous, private `mmap` for acquisition and `munmap` for release.
    //! Unlike the teacher (whose fixed `PAGE_SIZE` matches the OS page
    //! size), `SLAB_SIZE` is a runtime constant that may exceed the OS page
    //! granularity, so we over-map by one extra `SLAB_SIZE` and trim the
    //! unaligned head/tail back to the OS before returning.
    use super::align_up;
    use crate::config::SLAB_SIZE;
    use libc::{c_void, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};
    use std::ptr;

    pub(super) fn alloc_pages(size: usize) -> *mut u8 {
        let over_size = size + SLAB_SIZE;
        let raw = unsafe {
            libc::mmap(ptr::null_mut(), over_size, PROT_READ | PROT_WRITE, MAP_PRIVATE | MAP_ANONYMOUS, -1, 0)
        };
        if raw == MAP_FAILED {
            tracing::debug!(size, "mmap failed acquiring slab group pages");
            return ptr::null_mut();
        }
        let raw = raw as usize;
        let aligned = align_up(raw, SLAB_SIZE);
        let head_slack = aligned - raw;
        let tail_slack = over_size - head_slack - size;
        unsafe {
            if head_slack > 0 {
                libc::munmap(raw as *mut c_void, head_slack);
            }
            if tail_slack > 0 {
                libc::munmap((aligned + size) as *mut c_void, tail_slack);
            }
        }
        aligned as *mut u8
    }

    pub(super) unsafe fn dealloc_pages(ptr: *mut u8, size: usize) {
        libc::munmap(ptr as *mut c_void, size);
    }
}

#[cfg(windows)]
mod sys {
    //! Mirrors `examples/ryancinsight-halo/src/allocator/syscall/windows.rs`:
    //! `VirtualAlloc`/`VirtualFree`. `VirtualFree(MEM_RELEASE)` only accepts
    //! the exact base address of a prior `VirtualAlloc`, so unlike the Unix
    //! side we can't trim a larger reservation down to an aligned
    //! sub-region; instead we probe for an aligned address (reserve, note
    //! it, release) and then commit exactly there, retrying if another
    //! thread raced us for that address range.
    use super::align_up;
    use crate::config::SLAB_SIZE;
    use std::ptr;
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
    };

    const MAX_ATTEMPTS: usize = 8;

    pub(super) fn alloc_pages(size: usize) -> *mut u8 {
        for _ in 0..MAX_ATTEMPTS {
            let probe = unsafe { VirtualAlloc(ptr::null_mut(), size + SLAB_SIZE, MEM_RESERVE, PAGE_READWRITE) };
            if probe.is_null() {
                tracing::debug!(size, "VirtualAlloc probe failed acquiring slab group pages");
                return ptr::null_mut();
            }
            let aligned = align_up(probe as usize, SLAB_SIZE);
            unsafe { VirtualFree(probe, 0, MEM_RELEASE) };

            let committed =
                unsafe { VirtualAlloc(aligned as *mut _, size, MEM_RESERVE | MEM_COMMIT, PAGE_READWRITE) };
            if !committed.is_null() {
                return committed as *mut u8;
            }
            // Another thread claimed the aligned address between our probe
            // release and commit; retry with a fresh probe.
        }
        ptr::null_mut()
    }

    pub(super) unsafe fn dealloc_pages(ptr: *mut u8, _size: usize) {
        VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_correctly() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
    }

    #[test]
    fn system_page_alloc_is_slab_aligned() {
        let alloc = SystemPageAlloc;
        let p = alloc.alloc_page();
        assert!(!p.is_null());
        assert_eq!(p as usize % SLAB_SIZE, 0);
        unsafe { alloc.dealloc_pages(p, 1) };
    }

    #[test]
    fn multi_page_allocation_is_slab_aligned_and_contiguous() {
        let alloc = SystemPageAlloc;
        let p = alloc.alloc_pages(4);
        assert!(!p.is_null());
        assert_eq!(p as usize % SLAB_SIZE, 0);
        unsafe {
            // Touch the first and last byte of every page to confirm the
            // whole span is mapped and writable.
            for i in 0..4 {
                let page = p.add(i * SLAB_SIZE);
                page.write(0xAB);
                page.add(SLAB_SIZE - 1).write(0xCD);
            }
            alloc.dealloc_pages(p, 4);
        }
    }
}
