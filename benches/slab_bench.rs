use corpus_substrate::slab::Allocator;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::thread;
use std::time::Instant;

#[repr(C, align(8))]
struct Small {
    _bytes: [u8; 48],
}

fn bench_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("Slab Allocator Single Thread");
    group.sample_size(10);
    const BATCH: usize = 1000;

    group.bench_function("allocate/release", |b| {
        let alloc: Allocator<Small> = Allocator::new();
        b.iter(|| {
            let mut ptrs = Vec::with_capacity(BATCH);
            for _ in 0..BATCH {
                ptrs.push(alloc.allocate().unwrap());
            }
            black_box(&ptrs);
            for p in ptrs {
                unsafe { alloc.release(p) };
            }
        });
    });

    group.bench_function("Vec<Box> baseline", |b| {
        b.iter(|| {
            let mut v = Vec::with_capacity(BATCH);
            for _ in 0..BATCH {
                v.push(Box::new(Small { _bytes: [0; 48] }));
            }
            black_box(&v);
            v.clear();
        });
    });
}

fn bench_cross_thread_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("Slab Allocator Cross Thread Free");
    group.sample_size(10);
    const THREADS: usize = 4;
    const OPS_PER_THREAD: usize = 1000;

    group.bench_function("allocate owner / release foreign", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let alloc: Allocator<Small> = Allocator::new();
                let ptrs: Vec<_> =
                    (0..THREADS * OPS_PER_THREAD).map(|_| alloc.allocate().unwrap() as usize).collect();
                thread::scope(|scope| {
                    for chunk in ptrs.chunks(OPS_PER_THREAD) {
                        scope.spawn(move || {
                            for &p in chunk {
                                unsafe { alloc.release(p as *mut Small) };
                            }
                        });
                    }
                });
            }
            start.elapsed()
        });
    });
}

criterion_group!(benches, bench_single_thread, bench_cross_thread_contention);
criterion_main!(benches);
