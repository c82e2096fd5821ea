//! A lock-free, bounded Multi-Producer Multi-Consumer queue.
//!
//! Dmitry Vyukov's bounded MPMC ring buffer (spec §4.4.1). Used standalone
//! (the S2 producer/consumer property test) and as the backing structure
//! for the global queue of `SlabGroup`s with free slabs (spec §4.2).
//!
//! # Invariants
//!
//! - `head`: index of the next slot to pop.
//! - `tail`: index of the next slot to push into.
//! - `buffer`: power-of-two ring of slots, each carrying its own sequence
//!   number so producers and consumers can tell a slot's state without a
//!   separate "full" flag.
//! - `slot.sequence` is initialized to the slot's index; on push it must
//!   equal `tail` and is advanced to `tail + 1`; on pop it must equal
//!   `head + 1` and is advanced to `head + capacity`.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A slot in the ring buffer, cache-line aligned to prevent false sharing
/// between adjacent producers/consumers.
#[repr(align(64))]
struct Slot<T> {
    sequence: AtomicUsize,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// A lock-free, bounded MPMC queue.
///
/// `capacity` must be a power of two; enqueue/dequeue are both
/// non-blocking and simply fail when the queue is full/empty (spec
/// §4.4.1: "Non-blocking; returns success/failure").
pub struct BoundedMpmcQueue<T> {
    head: AtomicUsize,
    tail: AtomicUsize,
    buffer: Box<[Slot<T>]>,
    mask: usize,
}

unsafe impl<T: Send> Send for BoundedMpmcQueue<T> {}
unsafe impl<T: Send> Sync for BoundedMpmcQueue<T> {}

impl<T> BoundedMpmcQueue<T> {
    /// Creates a queue with room for `capacity` elements.
    ///
    /// # Panics
    /// Panics if `capacity` is zero or not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0 && capacity.is_power_of_two(), "capacity must be a power of two");
        let buffer: Box<[Slot<T>]> = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            buffer,
            mask: capacity - 1,
        }
    }

    /// The queue's fixed capacity.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempts to enqueue `value`. Returns it back on failure ("queue is
    /// full").
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mask = self.mask;
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[tail & mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = (seq as isize) - (tail as isize);

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.data.get()).write(value) };
                        slot.sequence.store(tail + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => tail = actual,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue a value. Returns `None` if the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mask = self.mask;
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.buffer[head & mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = (seq as isize) - (head as isize + 1);

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.data.get()).assume_init_read() };
                        slot.sequence.store(head + mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(actual) => head = actual,
                }
            } else if diff < 0 {
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Whether the queue currently has no enqueued elements. Racy under
    /// concurrent use; intended for diagnostics/tests only.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }
}

impl<T> Drop for BoundedMpmcQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_basic() {
        let q = BoundedMpmcQueue::new(2);
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        assert!(q.try_push(3).is_err());
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    /// Scenario S2: 4 producers x 50_000 pushes, 2 consumers draining
    /// 200_000 items total; the popped multiset must equal the pushed one.
    #[test]
    fn s2_producer_consumer_multiset_equality() {
        const PER_PRODUCER: u64 = 50_000;
        const PRODUCERS: u64 = 4;
        const TOTAL: u64 = PER_PRODUCER * PRODUCERS;
        let q = Arc::new(BoundedMpmcQueue::new(1024));
        let popped_count = Arc::new(AtomicUsize::new(0));
        let received: Arc<std::sync::Mutex<Vec<u64>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        thread::scope(|scope| {
            for p in 0..PRODUCERS {
                let q = q.clone();
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut v = p * PER_PRODUCER + i;
                        while let Err(back) = q.try_push(v) {
                            v = back;
                            thread::yield_now();
                        }
                    }
                });
            }

            for _ in 0..2 {
                let q = q.clone();
                let popped_count = popped_count.clone();
                let received = received.clone();
                scope.spawn(move || {
                    let mut local = Vec::new();
                    while popped_count.load(Ordering::Relaxed) < TOTAL as usize {
                        if let Some(v) = q.try_pop() {
                            local.push(v);
                            popped_count.fetch_add(1, Ordering::Relaxed);
                        } else {
                            thread::yield_now();
                        }
                    }
                    received.lock().unwrap().extend(local);
                });
            }
        });

        let mut got = received.lock().unwrap().clone();
        got.sort_unstable();
        let expected: Vec<u64> = (0..TOTAL).collect();
        assert_eq!(got, expected);
        assert!(q.is_empty());
    }
}
