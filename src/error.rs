//! Shared error taxonomy (spec §7).
//!
//! Every recoverable condition the substrate can hit is one of the six
//! kinds below; callers match on `Error` rather than threading a different
//! error enum through each module. The one *non*-recoverable condition —
//! too many registered allocator types — is a panic, not a variant here
//! (spec §4.1.5, §9 "exceptions for control flow").

use std::fmt;

/// A recoverable failure condition, classified per spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The OS refused a new page/slab-group allocation, or a pool's backing
    /// storage failed to grow.
    OutOfMemory,
    /// A persisted file's signature, format version, or self-check size
    /// field did not match what the reader expected.
    BadFormat,
    /// A short read or write against a file or memory-mapped region.
    IoFailure,
    /// The operation is not valid in the current state (e.g. mutating a
    /// read-only memory-mapped corpus).
    InvalidOperation,
    /// A `parallelize`/enumeration worker callback reported failure.
    UserFailure,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::OutOfMemory => "out of memory",
            Error::BadFormat => "bad file format",
            Error::IoFailure => "I/O failure",
            Error::InvalidOperation => "invalid operation",
            Error::UserFailure => "user callback reported failure",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Self {
        Error::IoFailure
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
