//! S2: producer/consumer. 4 producer threads push 50 000 `u64` values each
//! into a capacity-1024 MPMC queue; 2 consumer threads pop until all
//! 200 000 have been seen. The popped multiset must equal the pushed
//! multiset and the queue must end empty.

use corpus_substrate::queue::BoundedMpmcQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PRODUCERS: u64 = 4;
const PER_PRODUCER: u64 = 50_000;
const TOTAL: u64 = PRODUCERS * PER_PRODUCER;

#[test]
fn popped_multiset_equals_pushed_multiset() {
    let queue: Arc<BoundedMpmcQueue<u64>> = Arc::new(BoundedMpmcQueue::new(1024));
    let consumed = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|scope| {
        for p in 0..PRODUCERS {
            let queue = queue.clone();
            scope.spawn(move || {
                for i in 0..PER_PRODUCER {
                    let value = p * PER_PRODUCER + i;
                    let mut to_push = value;
                    loop {
                        match queue.try_push(to_push) {
                            Ok(()) => break,
                            Err(back) => {
                                to_push = back;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            });
        }

        let results: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                let consumed = consumed.clone();
                scope.spawn(move || {
                    let mut seen = Vec::new();
                    while (consumed.load(Ordering::Relaxed) as u64) < TOTAL {
                        if let Some(v) = queue.try_pop() {
                            seen.push(v);
                            consumed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            std::thread::yield_now();
                        }
                    }
                    seen
                })
            })
            .collect();

        let mut all_seen = Vec::new();
        for handle in results {
            all_seen.extend(handle.join().unwrap());
        }

        assert_eq!(all_seen.len() as u64, TOTAL);
        let mut counts: HashMap<u64, u32> = HashMap::new();
        for v in all_seen {
            *counts.entry(v).or_insert(0) += 1;
        }
        assert_eq!(counts.len() as u64, TOTAL);
        assert!(counts.values().all(|&c| c == 1));
    });

    assert!(queue.is_empty());
}
