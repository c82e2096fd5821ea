//! A counting semaphore built on an intrusive wait queue of parked threads.
//!
//! Grounded the same way the teacher's `GhostCondvar` builds on a raw
//! `WaitQueue` of `Thread` handles rather than reaching for `std::sync::Condvar`:
//! a spinlock-protected intrusive list plus `thread::park`/`unpark`. This lets
//! `post` wake exactly one waiter without a syscall round-trip through libc's
//! condvar, and gives us the two-stage `prepare_wait`/`commit_wait` protocol
//! the worker queue (spec §4.4.3) needs to avoid losing a wakeup that races
//! with a `push`.

use std::marker::PhantomPinned;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicIsize, Ordering};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

struct WaitNode {
    thread: Thread,
    woken: AtomicBool,
    next: Option<NonNull<WaitNode>>,
    _pin: PhantomPinned,
}

impl WaitNode {
    fn new() -> Self {
        Self {
            thread: thread::current(),
            woken: AtomicBool::new(false),
            next: None,
            _pin: PhantomPinned,
        }
    }
}

struct WaitQueue {
    head: Option<NonNull<WaitNode>>,
    tail: Option<NonNull<WaitNode>>,
}

struct RawSemaphore {
    /// Number of available permits; may go negative, in which case
    /// `-count` is the number of threads parked waiting for a permit.
    count: AtomicIsize,
    lock: AtomicBool,
    queue: std::cell::UnsafeCell<WaitQueue>,
}

unsafe impl Sync for RawSemaphore {}
unsafe impl Send for RawSemaphore {}

impl RawSemaphore {
    fn lock_queue(&self) {
        while self.lock.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    fn unlock_queue(&self) {
        self.lock.store(false, Ordering::Release);
    }

    unsafe fn push_locked(&self, node: NonNull<WaitNode>) {
        let q = &mut *self.queue.get();
        if let Some(mut t) = q.tail {
            t.as_mut().next = Some(node);
        } else {
            q.head = Some(node);
        }
        q.tail = Some(node);
    }

    unsafe fn pop_locked(&self) -> Option<NonNull<WaitNode>> {
        let q = &mut *self.queue.get();
        let head = q.head?;
        q.head = head.as_ref().next;
        if q.head.is_none() {
            q.tail = None;
        }
        Some(head)
    }
}

/// A counting semaphore.
pub struct Semaphore {
    raw: RawSemaphore,
}

impl Semaphore {
    /// Creates a semaphore with `initial` permits available.
    pub fn new(initial: usize) -> Self {
        Self {
            raw: RawSemaphore {
                count: AtomicIsize::new(initial as isize),
                lock: AtomicBool::new(false),
                queue: std::cell::UnsafeCell::new(WaitQueue { head: None, tail: None }),
            },
        }
    }

    /// Releases one permit, waking a single waiter if any is parked.
    pub fn post(&self) {
        let prev = self.raw.count.fetch_add(1, Ordering::AcqRel);
        if prev < 0 {
            // Someone is parked waiting; hand them the permit directly.
            loop {
                self.raw.lock_queue();
                let popped = unsafe { self.raw.pop_locked() };
                self.raw.unlock_queue();
                if let Some(node) = popped {
                    unsafe {
                        node.as_ref().woken.store(true, Ordering::Release);
                        node.as_ref().thread.unpark();
                    }
                    break;
                }
                // The waiter hasn't published its node yet; spin briefly.
                std::hint::spin_loop();
            }
        }
    }

    /// Acquires one permit, blocking until one is available.
    pub fn wait(&self) {
        let prev = self.raw.count.fetch_sub(1, Ordering::AcqRel);
        if prev > 0 {
            return;
        }
        let node = WaitNode::new();
        let node_ptr = unsafe { NonNull::new_unchecked(&node as *const _ as *mut WaitNode) };
        self.raw.lock_queue();
        unsafe { self.raw.push_locked(node_ptr) };
        self.raw.unlock_queue();

        while !node.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    /// Acquires one permit, blocking up to `timeout`. Returns `false` on
    /// timeout (a permit is then returned so no signal is lost). Provided
    /// per spec §5 ("timed-wait is provided but unused by the core").
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let prev = self.raw.count.fetch_sub(1, Ordering::AcqRel);
        if prev > 0 {
            return true;
        }
        let node = WaitNode::new();
        let node_ptr = unsafe { NonNull::new_unchecked(&node as *const _ as *mut WaitNode) };
        self.raw.lock_queue();
        unsafe { self.raw.push_locked(node_ptr) };
        self.raw.unlock_queue();

        let deadline = Instant::now() + timeout;
        while !node.woken.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                // Give the permit back; we're abandoning the wait.
                self.raw.count.fetch_add(1, Ordering::AcqRel);
                return node.woken.load(Ordering::Acquire);
            }
            thread::park_timeout(deadline - now);
        }
        true
    }

    /// Attempts to acquire a permit without blocking.
    pub fn try_wait(&self) -> bool {
        let mut current = self.raw.count.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match self.raw.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(c) => current = c,
            }
        }
    }
}

/// The first half of the two-stage wait protocol a worker uses before
/// parking: publish intent to wait, then re-check the condition, then
/// commit. A `push` that lands between `prepare_wait` and `commit_wait`
/// must not be allowed to leave the worker parked (spec §9).
pub struct PreparedWait<'a> {
    sem: &'a Semaphore,
}

impl Semaphore {
    /// Publishes that the caller is about to wait. The caller must re-check
    /// its wake condition (e.g. "queue non-empty") *after* this call and
    /// before calling `commit_wait`; if the condition now holds, call
    /// `abandon` instead.
    pub fn prepare_wait(&self) -> PreparedWait<'_> {
        PreparedWait { sem: self }
    }
}

impl<'a> PreparedWait<'a> {
    /// Commits to waiting: blocks until a `post` arrives. Any `post` that
    /// happened after `prepare_wait` and before this call is still
    /// observed, because `post`/`wait` share the same atomic counter.
    pub fn commit_wait(self) {
        self.sem.wait();
    }

    /// Abandons the wait because the condition was already satisfied when
    /// re-checked. No-op: the prepared intent carries no state to undo.
    pub fn abandon(self) {}
}
