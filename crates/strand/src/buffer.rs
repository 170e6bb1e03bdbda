// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Buffer strategies.
//!
//! A channel optionally owns one buffer. The strategy decides what "full"
//! means and what happens to new items at capacity: fixed buffers signal
//! backpressure, dropping/sliding buffers shed load, promise buffers latch
//! a single value forever.

use std::collections::VecDeque;

use thiserror::Error;

/// Error from buffer construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// Ring-backed buffers need room for at least one item.
    #[error("buffer capacity must be at least 1")]
    InvalidCapacity,
}

/// Admission/eviction policy owned by a channel.
///
/// `is_full` is a backpressure signal to producers, not a hard cap: `add`
/// must accept an item even when the buffer reports full, because a single
/// admission step may expand one input into several items.
pub trait Buffer<T> {
    /// Whether producers should be held back.
    fn is_full(&self) -> bool;
    /// Accept an item. Never fails; strategies shed load internally.
    fn add(&mut self, item: T);
    /// Pop the next item, or `None` when nothing is available.
    fn remove(&mut self) -> Option<T>;
    /// Number of items a consumer could currently observe.
    fn count(&self) -> usize;
    /// Invoked once by the owning channel when it closes.
    fn close(&mut self) {}
}

/// Ring buffer that reports full at capacity `n` but keeps accepting
/// items, so an expanding admission step can overflow it transiently.
#[derive(Debug)]
pub struct FixedBuffer<T> {
    ring: VecDeque<T>,
    n: usize,
}

impl<T> FixedBuffer<T> {
    pub fn new(n: usize) -> Result<Self, BufferError> {
        if n == 0 {
            return Err(BufferError::InvalidCapacity);
        }
        Ok(Self {
            ring: VecDeque::with_capacity(n),
            n,
        })
    }
}

impl<T> Buffer<T> for FixedBuffer<T> {
    fn is_full(&self) -> bool {
        self.ring.len() == self.n
    }

    fn add(&mut self, item: T) {
        self.ring.push_back(item);
    }

    fn remove(&mut self) -> Option<T> {
        self.ring.pop_front()
    }

    fn count(&self) -> usize {
        self.ring.len()
    }
}

/// Ring buffer that never blocks producers: once `n` items are held, new
/// items are silently discarded (the oldest `n` are retained).
#[derive(Debug)]
pub struct DroppingBuffer<T> {
    ring: VecDeque<T>,
    n: usize,
}

impl<T> DroppingBuffer<T> {
    pub fn new(n: usize) -> Result<Self, BufferError> {
        if n == 0 {
            return Err(BufferError::InvalidCapacity);
        }
        Ok(Self {
            ring: VecDeque::with_capacity(n),
            n,
        })
    }
}

impl<T> Buffer<T> for DroppingBuffer<T> {
    fn is_full(&self) -> bool {
        false
    }

    fn add(&mut self, item: T) {
        if self.ring.len() < self.n {
            self.ring.push_back(item);
        }
    }

    fn remove(&mut self) -> Option<T> {
        self.ring.pop_front()
    }

    fn count(&self) -> usize {
        self.ring.len()
    }
}

/// Ring buffer that never blocks producers: once `n` items are held, the
/// oldest is evicted to make room (the newest `n` are retained).
#[derive(Debug)]
pub struct SlidingBuffer<T> {
    ring: VecDeque<T>,
    n: usize,
}

impl<T> SlidingBuffer<T> {
    pub fn new(n: usize) -> Result<Self, BufferError> {
        if n == 0 {
            return Err(BufferError::InvalidCapacity);
        }
        Ok(Self {
            ring: VecDeque::with_capacity(n),
            n,
        })
    }
}

impl<T> Buffer<T> for SlidingBuffer<T> {
    fn is_full(&self) -> bool {
        false
    }

    fn add(&mut self, item: T) {
        if self.ring.len() == self.n {
            self.ring.pop_front();
        }
        self.ring.push_back(item);
    }

    fn remove(&mut self) -> Option<T> {
        self.ring.pop_front()
    }

    fn count(&self) -> usize {
        self.ring.len()
    }
}

#[derive(Debug)]
enum Slot<T> {
    /// No value delivered yet.
    Pending,
    /// Latched; every remove observes this value.
    Resolved(T),
    /// Closed before any value arrived.
    Empty,
}

/// Single-slot buffer that latches its first value. `remove` hands out the
/// value without consuming it, so every take ever issued sees the same
/// result. Closing an unresolved slot empties it so parked takers unblock.
#[derive(Debug)]
pub struct PromiseBuffer<T> {
    slot: Slot<T>,
}

impl<T> PromiseBuffer<T> {
    pub fn new() -> Self {
        Self { slot: Slot::Pending }
    }
}

impl<T> Default for PromiseBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Buffer<T> for PromiseBuffer<T> {
    fn is_full(&self) -> bool {
        false
    }

    fn add(&mut self, item: T) {
        if matches!(self.slot, Slot::Pending) {
            self.slot = Slot::Resolved(item);
        }
    }

    fn remove(&mut self) -> Option<T> {
        match &self.slot {
            Slot::Resolved(value) => Some(value.clone()),
            Slot::Pending | Slot::Empty => None,
        }
    }

    fn count(&self) -> usize {
        match self.slot {
            Slot::Resolved(_) => 1,
            Slot::Pending | Slot::Empty => 0,
        }
    }

    fn close(&mut self) {
        if matches!(self.slot, Slot::Pending) {
            self.slot = Slot::Empty;
        }
    }
}

/// Create a fixed buffer of capacity `n`.
pub fn fixed<T>(n: usize) -> Result<FixedBuffer<T>, BufferError> {
    FixedBuffer::new(n)
}

/// Create a dropping buffer of capacity `n`.
pub fn dropping<T>(n: usize) -> Result<DroppingBuffer<T>, BufferError> {
    DroppingBuffer::new(n)
}

/// Create a sliding buffer of capacity `n`.
pub fn sliding<T>(n: usize) -> Result<SlidingBuffer<T>, BufferError> {
    SlidingBuffer::new(n)
}

/// Create a promise buffer.
pub fn promise<T>() -> PromiseBuffer<T> {
    PromiseBuffer::new()
}
