//! The suffix-array corpus index (spec §4.8, component K): SA-IS
//! construction (`sais`) and the array type built on top of it that adds
//! lookup, length-bucketed enumeration, parallel enumeration, and
//! persistence.

pub mod sais;
pub mod array;

pub use array::SuffixArray;
pub use sais::sa_is;
