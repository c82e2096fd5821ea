//! # `corpus-substrate`
//!
//! The concurrent memory-and-indexing substrate underneath a word-corpus
//! search engine: a thread-local slab allocator, the MPSC/MPMC work queues
//! and worker pool that coordinate background work on top of it, and the
//! suffix-array corpus index that is the reason the allocator needs to be
//! fast in the first place.
//!
//! ## Architecture
//!
//! ```text
//!           user code
//!              |
//!              v
//!   Allocator (per type) --> Slab (owned) --> SlabGroup --> MPMC queue of groups
//!              |                                            ^
//!              |  cross-thread frees                        |
//!              v                                            |
//!        Slab.footer.freelist -- reclaim -- Allocator
//!              |
//!              v
//!         user objects (ItemPool, BufferBuilder, BidirectionalIndex, ...)
//!              |
//!              v
//!       WordCorpus --> SuffixArray --> ThreadPool (for parallel enumeration)
//! ```
//!
//! Every module below corresponds to one component of that diagram; see
//! `DESIGN.md` for the grounding of each against the example corpus this
//! crate was built from.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod sync;
pub mod queue;
pub mod slab;
pub mod pool;
pub mod index;
pub mod suffix;
pub mod corpus;
pub mod io;

pub use error::{Error, Result};
