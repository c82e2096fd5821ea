use corpus_substrate::pool::ThreadPool;
use corpus_substrate::suffix::SuffixArray;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

const NEWLINE_MARK: u32 = 64;
const SIGMA: usize = 65;

fn make_ids(n: usize) -> Vec<u32> {
    let mut ids = Vec::with_capacity(n + 1);
    for i in 0..n as u32 {
        ids.push((i % 63) + 1);
        if i % 80 == 0 {
            ids.push(NEWLINE_MARK);
        }
    }
    ids.push(0);
    ids
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("Suffix Array Construction");
    group.sample_size(10);
    let ids = make_ids(50_000);

    group.bench_function("sa_is 50k symbols", |b| {
        b.iter(|| {
            let sa = SuffixArray::generate(
                Arc::from(ids.clone()),
                SIGMA,
                0,
                NEWLINE_MARK,
                NEWLINE_MARK,
                None,
                false,
            );
            black_box(sa.len());
        });
    });
}

fn bench_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("Suffix Array Enumeration");
    group.sample_size(10);
    let ids = make_ids(50_000);
    let sa = SuffixArray::generate(Arc::from(ids), SIGMA, 0, NEWLINE_MARK, NEWLINE_MARK, None, false);

    group.bench_function("serial enumerate 2..=4", |b| {
        b.iter(|| {
            let mut total = 0usize;
            sa.enumerate(0, sa.len(), 2, 4, |_, _, _, _| true, |_, _, freq, _| total += freq);
            black_box(total);
        });
    });

    let pool = ThreadPool::new(4);
    group.bench_function("parallel enumerate 2..=4, 4 workers", |b| {
        b.iter(|| {
            let total = std::sync::atomic::AtomicUsize::new(0);
            sa.enumerate_parallel(&pool, 2, 4, |_, _, _, _| true, |_, _, freq, _| {
                total.fetch_add(freq, std::sync::atomic::Ordering::Relaxed);
            });
            black_box(total.load(std::sync::atomic::Ordering::Relaxed));
        });
    });
}

criterion_group!(benches, bench_construction, bench_enumeration);
criterion_main!(benches);
