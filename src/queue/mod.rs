//! Work queues (spec §4.4): a bounded MPMC ring (component D) and an
//! unbounded MPSC linked queue (component E). The per-worker work-stealing
//! deque (component G) lives in [`crate::pool::deque`] since it is only
//! ever used inside the thread pool.

pub mod mpmc;
pub mod mpsc;

pub use mpmc::BoundedMpmcQueue;
pub use mpsc::UnboundedMpscQueue;
