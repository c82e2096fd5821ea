//! Cache-line padding to prevent false sharing.

use std::ops::{Deref, DerefMut};

/// Wraps `T` and pads it out to 128 bytes.
///
/// 128 rather than 64 to stay correct on Apple Silicon's larger cache
/// lines while still separating adjacent x86_64 cache lines.
#[repr(align(128))]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Wraps `value` in a cache-padded cell.
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Unwraps the padded value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
