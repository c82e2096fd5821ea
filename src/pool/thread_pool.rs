//! The worker thread pool (spec §4.4.3, component G).
//!
//! Dispatch comes in three shapes, all funneled through the same per-worker
//! [`WorkerDeque`]:
//!
//! - **single-task**: round-robins across workers, falling back to the
//!   [`crate::sync::backoff::DispatchBackoff`] policy (yield x10, then sleep
//!   1ms) when every deque is momentarily full.
//! - **batch**: the same round-robin, applied to a whole slice of tasks.
//! - **parallelize**: splits a slice into chunks of `32 * worker_count`
//!   (spec §4.4.3) and dispatches one task per chunk.
//!
//! A work order is either a real task, an `Ack` (a no-op sentinel used to
//! implement [`ThreadPool::wait_until_idle`] as a barrier) or an `Exit`
//! sentinel that tells the worker to stop its loop. Each worker also owns a
//! [`Semaphore`] it parks on between the two-stage `prepare_wait` /
//! `commit_wait` calls, so a dispatch landing between the check and the
//! park is never missed (spec §9).

use crate::pool::deque::WorkerDeque;
use crate::sync::backoff::DispatchBackoff;
use crate::sync::semaphore::Semaphore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// One entry in a worker's deque: a real unit of work, or one of the two
/// dispatcher sentinels.
pub enum WorkOrder {
    /// A unit of work to run on a worker thread.
    Task(Task),
    /// No-op: decrements the outstanding-work counter without running
    /// anything. Used to implement [`ThreadPool::wait_until_idle`].
    Ack,
    /// Tells the receiving worker to stop its loop.
    Exit,
}

struct Worker {
    deque: Arc<WorkerDeque<WorkOrder>>,
    parked: Semaphore,
}

/// A fixed-size pool of worker threads, each with its own work-stealing
/// deque.
pub struct ThreadPool {
    workers: Vec<Arc<Worker>>,
    handles: Vec<JoinHandle<()>>,
    next: AtomicUsize,
    outstanding: Arc<AtomicUsize>,
    idle_gate: Arc<Semaphore>,
    shutting_down: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Spawns a pool with `worker_count` threads (at least 1).
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let outstanding = Arc::new(AtomicUsize::new(0));
        let idle_gate = Arc::new(Semaphore::new(0));
        let shutting_down = Arc::new(AtomicBool::new(false));

        let workers: Vec<Arc<Worker>> = (0..worker_count)
            .map(|_| {
                Arc::new(Worker {
                    deque: Arc::new(WorkerDeque::new(crate::config::WORKQUEUE_SIZE)),
                    parked: Semaphore::new(0),
                })
            })
            .collect();

        let handles = workers
            .iter()
            .enumerate()
            .map(|(id, me)| {
                let me = me.clone();
                let peers = workers.clone();
                let outstanding = outstanding.clone();
                let idle_gate = idle_gate.clone();
                std::thread::Builder::new()
                    .name(format!("corpus-substrate-worker-{id}"))
                    .spawn(move || worker_loop(id, me, peers, outstanding, idle_gate))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::info!(worker_count, "thread pool started");
        Self {
            workers,
            handles,
            next: AtomicUsize::new(0),
            outstanding,
            idle_gate,
            shutting_down,
        }
    }

    /// Number of worker threads in the pool.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn push_to(&self, idx: usize, mut order: WorkOrder) {
        let mut backoff = DispatchBackoff::new();
        loop {
            match self.workers[idx].deque.push_bottom(Box::new(order)) {
                Ok(()) => {
                    self.workers[idx].parked.post();
                    return;
                }
                Err(back) => {
                    order = *back;
                    backoff.spin();
                }
            }
        }
    }

    fn round_robin_target(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Dispatches a single task to the next worker in round-robin order.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let idx = self.round_robin_target();
        self.push_to(idx, WorkOrder::Task(Box::new(task)));
    }

    /// Dispatches a batch of independent tasks, round-robinning each one
    /// across the pool.
    pub fn dispatch_batch<F>(&self, tasks: Vec<F>)
    where
        F: FnOnce() + Send + 'static,
    {
        for task in tasks {
            self.dispatch(task);
        }
    }

    /// Splits `items` into chunks of `32 * worker_count` elements, maps
    /// `f` over each chunk on the pool, and returns the per-item results in
    /// original order. Blocks until every chunk has completed.
    pub fn parallelize_map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync,
    {
        if items.is_empty() {
            return Vec::new();
        }
        let chunk_size = (32 * self.worker_count()).max(1);
        let mut results: Vec<std::mem::MaybeUninit<R>> =
            (0..items.len()).map(|_| std::mem::MaybeUninit::uninit()).collect();

        // SAFETY: each chunk's index range is disjoint, so handing out raw
        // pointers into `results` to be written from worker threads (each
        // writing only within its own chunk's range) does not race.
        let results_ptr = results.as_mut_ptr() as usize;
        let f = &f;

        std::thread::scope(|scope| {
            let mut remaining = items.len();
            let mut start = 0;
            while remaining > 0 {
                let len = chunk_size.min(remaining);
                let chunk = &items[start..start + len];
                let base = start;
                scope.spawn(move || {
                    for (i, item) in chunk.iter().enumerate() {
                        let value = f(item);
                        unsafe {
                            let ptr = results_ptr as *mut std::mem::MaybeUninit<R>;
                            ptr.add(base + i).write(std::mem::MaybeUninit::new(value));
                        }
                    }
                });
                start += len;
                remaining -= len;
            }
        });

        results.into_iter().map(|slot| unsafe { slot.assume_init() }).collect()
    }

    /// Blocks until every previously dispatched task (and every in-flight
    /// `Ack`) has completed. Implemented by pushing one `Ack` sentinel per
    /// worker and waiting for the outstanding-work counter to drain.
    pub fn wait_until_idle(&self) {
        loop {
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.outstanding.fetch_add(1, Ordering::SeqCst);
            let idx = self.round_robin_target();
            self.push_to(idx, WorkOrder::Ack);
            self.idle_gate.wait();
        }
    }
}

fn worker_loop(
    id: usize,
    me: Arc<Worker>,
    peers: Vec<Arc<Worker>>,
    outstanding: Arc<AtomicUsize>,
    idle_gate: Arc<Semaphore>,
) {
    tracing::debug!(worker = id, "worker thread started");
    loop {
        if let Some(order) = me.deque.pop_bottom() {
            if run_order(*order, &outstanding, &idle_gate) {
                tracing::debug!(worker = id, "worker thread exiting");
                return;
            }
            continue;
        }

        let stolen = peers
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id)
            .find_map(|(_, other)| other.deque.steal());
        if let Some(order) = stolen {
            if run_order(*order, &outstanding, &idle_gate) {
                tracing::debug!(worker = id, "worker thread exiting");
                return;
            }
            continue;
        }

        let prepared = me.parked.prepare_wait();
        if !me.deque.is_empty() {
            prepared.abandon();
            continue;
        }
        prepared.commit_wait();
    }
}

/// Runs one order; returns `true` if the worker should stop.
fn run_order(order: WorkOrder, outstanding: &AtomicUsize, idle_gate: &Semaphore) -> bool {
    match order {
        WorkOrder::Task(task) => {
            task();
            if outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle_gate.post();
            }
            false
        }
        WorkOrder::Ack => {
            if outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                idle_gate.post();
            }
            false
        }
        WorkOrder::Exit => true,
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for worker in &self.workers {
            let mut backoff = DispatchBackoff::new();
            loop {
                match worker.deque.push_bottom(Box::new(WorkOrder::Exit)) {
                    Ok(()) => {
                        worker.parked.post();
                        break;
                    }
                    Err(_) => backoff.spin(),
                }
            }
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
