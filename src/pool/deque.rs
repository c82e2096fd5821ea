//! A fixed-capacity Chase-Lev work-stealing deque (spec §4.4.3, component G:
//! "per-worker Chase-Lev-style deques; push/fastPop by owner, steal by
//! others").
//!
//! Each worker thread owns one `WorkerDeque`: it pushes/pops its own
//! generated sub-work from the bottom (LIFO, for cache locality on
//! recursively split work such as parallel suffix-array enumeration), while
//! idle workers steal from the top (FIFO relative to the owner, oldest
//! first) when their own deque runs dry.
//!
//! Slots hold a boxed item's raw pointer as a `usize`; `0` marks an empty
//! slot, which is sound because `Box::into_raw` is never null.

use std::sync::atomic::{fence, AtomicUsize, Ordering};

const EMPTY: usize = 0;

/// A bounded, single-owner/multi-stealer work-stealing deque.
pub struct WorkerDeque<T> {
    top: AtomicUsize,
    bottom: AtomicUsize,
    buf: Box<[AtomicUsize]>,
    mask: usize,
    _marker: std::marker::PhantomData<fn() -> T>,
}

unsafe impl<T: Send> Send for WorkerDeque<T> {}
unsafe impl<T: Send> Sync for WorkerDeque<T> {}

impl<T> WorkerDeque<T> {
    /// Creates an empty deque. `capacity` must be a power of two (spec
    /// §6: `FrWORKQUEUE_SIZE`, default 512).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two() && capacity != 0);
        let buf = (0..capacity).map(|_| AtomicUsize::new(EMPTY)).collect();
        Self {
            top: AtomicUsize::new(0),
            bottom: AtomicUsize::new(0),
            buf,
            mask: capacity - 1,
            _marker: std::marker::PhantomData,
        }
    }

    /// Pushes `item` to the bottom. Owner-only. Returns the item back if
    /// the deque is full.
    pub fn push_bottom(&self, item: Box<T>) -> Result<(), Box<T>> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        if b.wrapping_sub(t) >= self.buf.len() {
            return Err(item);
        }
        let ptr = Box::into_raw(item) as usize;
        self.buf[b & self.mask].store(ptr, Ordering::Relaxed);
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Release);
        Ok(())
    }

    /// Pops from the bottom. Owner-only.
    pub fn pop_bottom(&self) -> Option<Box<T>> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t0 = self.top.load(Ordering::Acquire);
        if b <= t0 {
            return None;
        }

        let b1 = b - 1;
        self.bottom.store(b1, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Acquire);
        if t > b1 {
            self.bottom.store(b, Ordering::Relaxed);
            return None;
        }

        let ptr = self.buf[b1 & self.mask].load(Ordering::Relaxed);
        if t == b1 {
            // Last element: race against stealers for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b, Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        debug_assert_ne!(ptr, EMPTY);
        Some(unsafe { Box::from_raw(ptr as *mut T) })
    }

    /// Attempts to steal from the top. Any number of concurrent stealers.
    pub fn steal(&self) -> Option<Box<T>> {
        loop {
            let t = self.top.load(Ordering::Acquire);
            fence(Ordering::SeqCst);
            let b = self.bottom.load(Ordering::Acquire);
            if t >= b {
                return None;
            }
            let ptr = self.buf[t & self.mask].load(Ordering::Relaxed);
            if ptr == EMPTY {
                // The owner has claimed this slot but not yet published it; retry.
                continue;
            }
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(unsafe { Box::from_raw(ptr as *mut T) });
            }
        }
    }

    /// A racy, best-effort estimate of whether the deque is empty.
    pub fn is_empty(&self) -> bool {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        t >= b
    }
}

impl<T> Drop for WorkerDeque<T> {
    fn drop(&mut self) {
        while self.pop_bottom().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn owner_push_pop_is_lifo() {
        let d: WorkerDeque<i32> = WorkerDeque::new(16);
        d.push_bottom(Box::new(1)).unwrap();
        d.push_bottom(Box::new(2)).unwrap();
        assert_eq!(*d.pop_bottom().unwrap(), 2);
        assert_eq!(*d.pop_bottom().unwrap(), 1);
        assert!(d.pop_bottom().is_none());
    }

    #[test]
    fn full_deque_rejects_push() {
        let d: WorkerDeque<i32> = WorkerDeque::new(2);
        assert!(d.push_bottom(Box::new(1)).is_ok());
        assert!(d.push_bottom(Box::new(2)).is_ok());
        assert!(d.push_bottom(Box::new(3)).is_err());
    }

    #[test]
    fn stealers_and_owner_partition_all_items() {
        const N: usize = 20_000;
        let d = Arc::new(WorkerDeque::<usize>::new(1 << 16));
        for i in 0..N {
            d.push_bottom(Box::new(i)).unwrap();
        }

        let taken = Arc::new(std::sync::Mutex::new(Vec::new()));
        thread::scope(|scope| {
            for _ in 0..4 {
                let d = d.clone();
                let taken = taken.clone();
                scope.spawn(move || {
                    let mut local = Vec::new();
                    while let Some(v) = d.steal() {
                        local.push(*v);
                    }
                    taken.lock().unwrap().extend(local);
                });
            }
            let mut owned = Vec::new();
            while let Some(v) = d.pop_bottom() {
                owned.push(*v);
            }
            taken.lock().unwrap().extend(owned);
        });

        let mut all = taken.lock().unwrap().clone();
        all.sort_unstable();
        assert_eq!(all, (0..N).collect::<Vec<_>>());
    }
}
