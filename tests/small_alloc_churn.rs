//! S1: small-alloc churn. A single thread allocates and releases many
//! small objects, then reclaims, and the thread-local/global bookkeeping
//! shrinks back down as expected.
//!
//! Both assertions live in one `#[test]` rather than two: `GlobalSlabPool`
//! is a process-wide singleton, and cargo runs tests in one binary
//! concurrently by default, so a second test allocating from the same
//! pool at the same time would make the group-count assertion flaky.

use corpus_substrate::slab::group::GlobalSlabPool;
use corpus_substrate::slab::Allocator;

#[repr(C, align(8))]
struct Small {
    _bytes: [u8; 48],
}

#[test]
fn churn_then_reclaim_shrinks_owned_and_global_state() {
    let alloc: Allocator<Small> = Allocator::new();

    let ptrs: Vec<_> = (0..100_000).map(|_| alloc.allocate().unwrap()).collect();
    for p in ptrs {
        unsafe { alloc.release(p) };
    }
    alloc.reclaim(false);

    // Every object handed out was released before reclaim, so a fresh
    // allocation must come from a page the cache or pool still holds.
    let p = alloc.allocate().unwrap();
    unsafe {
        std::ptr::write(p as *mut Small, Small { _bytes: [7; 48] });
        alloc.release(p);
    }
    alloc.reclaim(false);

    GlobalSlabPool::global().reclaim();
    assert!(GlobalSlabPool::global().group_count() <= 1);
}
