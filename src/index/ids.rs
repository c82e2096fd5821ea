//! The integer id types used as dense indices throughout `index`, `suffix`
//! and `corpus` (spec §3: "Word buffer... width 24, 32, or 40 bits
//! depending on instantiation").
//!
//! Rust has no native 24- or 40-bit integer type, so rather than hand-roll
//! packed bit-widths (which the rest of the ecosystem does not do either),
//! this crate instantiates every generic id-width slot with `u32` or `u64`
//! and documents the width choice as an open question resolved in
//! `DESIGN.md`.

use std::hash::Hash;

/// A dense, zero-based id usable as both a vocabulary index and a suffix
/// array position.
pub trait IndexInt: Copy + Eq + Hash + Ord + std::fmt::Debug + Send + Sync + 'static {
    fn from_usize(value: usize) -> Self;
    fn as_usize(self) -> usize;
    /// The default "lookup failed" sentinel (spec §4.6: "a configurable
    /// error id, default all-ones").
    fn error_id() -> Self;
}

macro_rules! impl_index_int {
    ($t:ty) => {
        impl IndexInt for $t {
            #[inline]
            fn from_usize(value: usize) -> Self {
                value as $t
            }
            #[inline]
            fn as_usize(self) -> usize {
                self as usize
            }
            #[inline]
            fn error_id() -> Self {
                <$t>::MAX
            }
        }
    };
}

impl_index_int!(u32);
impl_index_int!(u64);
