//! S6: Ack barrier. Dispatch a large batch of no-op orders, call
//! `wait_until_idle`, then dispatch one more order that records a value;
//! reading that value from the calling thread right after
//! `wait_until_idle` returns must already observe the write (the barrier
//! happens-before the read).

use corpus_substrate::pool::ThreadPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[test]
fn tick_recorded_after_wait_until_idle_is_visible() {
    let pool = ThreadPool::new(4);

    for _ in 0..10_000 {
        pool.dispatch(|| {});
    }
    pool.wait_until_idle();

    let tick = Arc::new(AtomicU64::new(0));
    let tick2 = tick.clone();
    pool.dispatch(move || {
        tick2.store(42, Ordering::SeqCst);
    });
    pool.wait_until_idle();

    assert_eq!(tick.load(Ordering::SeqCst), 42);
}
