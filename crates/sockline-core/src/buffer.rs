//! Bounded FIFO for messages composed while the link is down.

use std::collections::VecDeque;
use tracing::warn;

/// Fixed-capacity ordered queue.
///
/// Capacity is set at construction and never changes. At capacity, [`add`]
/// drops the incoming item and reports it; buffered items are never
/// overwritten. [`flush`] drains everything in insertion order.
///
/// [`add`]: MessageBuffer::add
/// [`flush`]: MessageBuffer::flush
#[derive(Debug)]
pub struct MessageBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> MessageBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append an item. Returns `false` (and drops the item) when the buffer
    /// is full.
    pub fn add(&mut self, item: T) -> bool {
        if self.items.len() >= self.capacity {
            self.dropped += 1;
            warn!(
                target: "sockline::buffer",
                "Buffer full at {} items, dropping message ({} dropped total)",
                self.capacity, self.dropped
            );
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Drain all buffered items in insertion order. The buffer is empty
    /// afterwards; the dropped count is retained.
    pub fn flush(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Put items drained by a failed flush back at the front, oldest first,
    /// ahead of anything added since. Entries beyond capacity spill off the
    /// newest end and count as dropped.
    pub fn requeue_front(&mut self, items: Vec<T>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        let mut spilled = 0;
        while self.items.len() > self.capacity {
            self.items.pop_back();
            self.dropped += 1;
            spilled += 1;
        }
        if spilled > 0 {
            warn!(
                target: "sockline::buffer",
                "Requeue overflowed capacity {}, dropping {} newest messages",
                self.capacity, spilled
            );
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many adds have been rejected since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
