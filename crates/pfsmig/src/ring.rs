//! Bounded single-owner ring queue.
//!
//! Each queue owner holds one `RingQueue<Task>` per OST it manages. The
//! queue is touched by exactly one thread (the owner's message loop, per the
//! one-accessor concurrency contract), so there are no atomics and no locks:
//! just a fixed buffer and three indices.
//!
//! Capacity is fixed at construction; a push against a full queue fails and
//! hands the item back so the caller can retry after consumers drain a slot.

use crate::invariants::{
    debug_assert_index_in_range, debug_assert_occupancy, debug_assert_ring_consistent,
};
use thiserror::Error;

/// Push rejected because the queue is full. Carries the item back.
#[derive(Debug, Error)]
#[error("ring queue full")]
pub struct PushError<T>(pub T);

/// Fixed-capacity FIFO with O(1) push/pop and no reallocation.
///
/// The buffer uses `Box<[Option<T>]>`: the size is fixed for the queue's
/// lifetime and slots are reused in place as head and tail wrap.
#[derive(Debug)]
pub struct RingQueue<T> {
    buffer: Box<[Option<T>]>,
    capacity: usize,
    /// Next slot to pop.
    head: usize,
    /// Next slot to fill.
    tail: usize,
    /// Current element count.
    size: usize,
}

impl<T> RingQueue<T> {
    /// Creates a queue holding up to `capacity` items.
    ///
    /// `capacity` must be at least 1; the configuration layer enforces this
    /// before any queue is built.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring capacity must be >= 1");
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            head: 0,
            tail: 0,
            size: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    /// Free slots remaining.
    #[inline]
    pub fn free(&self) -> usize {
        self.capacity - self.size
    }

    /// Appends at the tail, or returns the item untouched when full.
    pub fn push(&mut self, item: T) -> Result<(), PushError<T>> {
        if self.is_full() {
            return Err(PushError(item));
        }
        debug_assert_index_in_range!("tail", self.tail, self.capacity);
        self.buffer[self.tail] = Some(item);
        self.tail = (self.tail + 1) % self.capacity;
        self.size += 1;
        debug_assert_occupancy!(self.size, self.capacity);
        debug_assert_ring_consistent!(self.head, self.tail, self.size, self.capacity);
        Ok(())
    }

    /// Removes from the head, or `None` when empty.
    pub fn pop(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        debug_assert_index_in_range!("head", self.head, self.capacity);
        let item = self.buffer[self.head].take();
        debug_assert!(item.is_some(), "occupied slot was empty");
        self.head = (self.head + 1) % self.capacity;
        self.size -= 1;
        debug_assert_ring_consistent!(self.head, self.tail, self.size, self.capacity);
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut q = RingQueue::with_capacity(4);
        for i in 0..4 {
            q.push(i).unwrap();
        }
        for i in 0..4 {
            assert_eq!(q.pop(), Some(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_full_returns_item() {
        let mut q = RingQueue::with_capacity(2);
        q.push("a").unwrap();
        q.push("b").unwrap();
        let err = q.push("c").unwrap_err();
        assert_eq!(err.0, "c");
        // State unchanged by the failed push.
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some("a"));
    }

    #[test]
    fn test_pop_empty() {
        let mut q: RingQueue<u32> = RingQueue::with_capacity(1);
        assert_eq!(q.pop(), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_wraparound_reuses_slots() {
        let mut q = RingQueue::with_capacity(3);
        // Drive head and tail around the buffer several times.
        for round in 0u32..10 {
            q.push(round * 2).unwrap();
            q.push(round * 2 + 1).unwrap();
            assert_eq!(q.pop(), Some(round * 2));
            assert_eq!(q.pop(), Some(round * 2 + 1));
        }
        assert!(q.is_empty());
        assert_eq!(q.free(), 3);
    }

    #[test]
    fn test_capacity_one() {
        let mut q = RingQueue::with_capacity(1);
        q.push(7u64).unwrap();
        assert!(q.is_full());
        assert!(q.push(8).is_err());
        assert_eq!(q.pop(), Some(7));
        q.push(8).unwrap();
        assert_eq!(q.pop(), Some(8));
    }
}
