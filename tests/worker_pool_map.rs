//! S5: worker-pool map. `parallelize_map` over 1000 items computing
//! `i * i` must match a sequential computation of the same.

use corpus_substrate::pool::ThreadPool;

#[test]
fn parallelize_map_computes_squares() {
    let pool = ThreadPool::new(4);
    let items: Vec<i64> = (0..1000).collect();
    let out = pool.parallelize_map(&items, |&i| i * i);
    assert_eq!(out.len(), items.len());
    for (i, &v) in out.iter().enumerate() {
        assert_eq!(v, (i as i64) * (i as i64));
    }
}
