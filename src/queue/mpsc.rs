//! An unbounded, intrusive Multi-Producer Single-Consumer queue.
//!
//! Dmitry Vyukov's "non-intrusive" MPSC linked queue (spec §4.4.2): feeds
//! the resize-helper and other background workers. Producers never block;
//! the consumer's blocking `pop` spins, yields a few times, then sleeps
//! (spec: "~500 µs") via [`crate::sync::backoff::QueueBackoff`].

use crate::sync::backoff::QueueBackoff;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: Option<T>,
}

/// An unbounded MPSC queue.
///
/// Cloning shares the same underlying queue (it is reference-counted
/// internally via the caller wrapping it in `Arc`, matching the teacher's
/// `Sender`/`Receiver` split): this type itself is the shared state and
/// exposes both producer and consumer operations, since spec §4.4.2 does
/// not split it into separate handle types.
pub struct UnboundedMpscQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
}

unsafe impl<T: Send> Send for UnboundedMpscQueue<T> {}
unsafe impl<T: Send> Sync for UnboundedMpscQueue<T> {}

impl<T> UnboundedMpscQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let stub = Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: None,
        }));
        Self {
            head: AtomicPtr::new(stub),
            tail: AtomicPtr::new(stub),
        }
    }

    /// Enqueues `value`. Never blocks.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            next: AtomicPtr::new(ptr::null_mut()),
            value: Some(value),
        }));
        let prev = self.head.swap(node, Ordering::AcqRel);
        unsafe { (*prev).next.store(node, Ordering::Release) };
    }

    /// Attempts to dequeue without blocking. Consumer-only.
    pub fn try_pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = unsafe { (*tail).next.load(Ordering::Acquire) };
        if next.is_null() {
            return None;
        }
        let value = unsafe { (*next).value.take() };
        self.tail.store(next, Ordering::Release);
        unsafe { drop(Box::from_raw(tail)) };
        value
    }

    /// Dequeues, blocking (spin/yield/sleep) until a value is available.
    /// Consumer-only.
    pub fn pop(&self) -> T {
        let mut backoff = QueueBackoff::new();
        loop {
            if let Some(v) = self.try_pop() {
                return v;
            }
            backoff.spin();
        }
    }

    /// Whether the queue currently has no enqueued elements. Racy under
    /// concurrent producers; intended for diagnostics only.
    pub fn is_empty(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        unsafe { (*tail).next.load(Ordering::Acquire).is_null() }
    }
}

impl<T> Default for UnboundedMpscQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for UnboundedMpscQueue<T> {
    fn drop(&mut self) {
        let mut curr = self.tail.load(Ordering::Relaxed);
        while !curr.is_null() {
            let boxed = unsafe { Box::from_raw(curr) };
            curr = boxed.next.load(Ordering::Relaxed);
        }
    }
}
