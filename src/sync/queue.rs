//! Bounded FIFO buffer with head eviction.

use std::collections::VecDeque;

/// FIFO buffer. With a non-zero capacity the oldest entry is evicted to make
/// room for a new one; capacity 0 means unbounded.
#[derive(Debug)]
pub struct Queue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Queue<T> {
    /// Create an unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a queue holding at most `capacity` entries (0 = unbounded).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append to the tail. Returns the evicted head when the queue was full.
    pub fn enqueue(&mut self, item: T) -> Option<T> {
        let evicted = if self.capacity > 0 && self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Remove and return the head.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Remove every entry, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.items.len() >= self.capacity
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = Queue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_evicts_head_at_capacity() {
        let mut queue = Queue::with_capacity(2);
        assert_eq!(queue.enqueue("a"), None);
        assert_eq!(queue.enqueue("b"), None);
        assert!(queue.is_full());

        // Head eviction, not LRU
        assert_eq!(queue.enqueue("c"), Some("a"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), Some("c"));
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let mut queue = Queue::with_capacity(0);
        for i in 0..1_000 {
            assert_eq!(queue.enqueue(i), None);
        }
        assert_eq!(queue.len(), 1_000);
        assert!(!queue.is_full());
    }

    #[test]
    fn test_clear() {
        let mut queue = Queue::with_capacity(4);
        queue.enqueue(1);
        queue.enqueue(2);
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.capacity(), 4);
    }
}
