//! The vocabulary and buffer layer a [`crate::corpus::WordCorpus`] is built
//! from (spec §4.6, §4.7, components I and J): a bidirectional key↔id map
//! and an append-only buffer builder, plus the small `IndexInt` trait that
//! picks the concrete id width for both.

pub mod ids;
pub mod bidirectional;
pub mod buffer_builder;

pub use ids::IndexInt;
pub use bidirectional::BidirectionalIndex;
pub use buffer_builder::{BufferBuilder, ConcurrentBufferBuilder, MmappedBuffer};
