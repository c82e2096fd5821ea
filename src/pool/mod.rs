//! The worker-pool scheduler (spec §4.4.3, component G) and the item pool
//! (spec §4.5, component H) that rides on top of the slab allocator.

pub mod deque;
pub mod thread_pool;
pub mod item_pool;

pub use deque::WorkerDeque;
pub use thread_pool::{ThreadPool, WorkOrder};
pub use item_pool::ItemPool;
