//! Unbounded multi-producer multi-consumer FIFO queue.
//!
//! `push` always succeeds and is wait-free under no contention; `pop` is
//! lock-free and never hands the same item to two consumers. Built on
//! `crossbeam_queue::SegQueue`, which provides exactly this contract with a
//! segmented-array Michael-Scott-style layout and epoch-based reclamation —
//! re-deriving that from raw atomics buys nothing but risk. A side counter
//! tracks `len` the same way the source's hand-rolled queue does (an atomic
//! bumped on push/pop beside the lock-free structure itself), since `len()`
//! on the underlying structure is not O(1).

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct MpmcQueue<T> {
    inner: SegQueue<T>,
    len: AtomicUsize,
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MpmcQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, item: T) {
        self.inner.push(item);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop(&self) -> Option<T> {
        let item = self.inner.pop();
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    /// A monotone-consistent snapshot of the queue depth: it may lag a
    /// concurrent push/pop, but never reports fewer items than any producer
    /// has observed being accepted and not yet popped.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
