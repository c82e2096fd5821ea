//! Persistence helpers shared by every on-disk format in spec §6.

pub mod byteorder;
pub mod format;

pub use byteorder::ByteOrdered;
