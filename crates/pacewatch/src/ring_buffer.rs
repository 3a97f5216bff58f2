//! Fixed-capacity FIFO with oldest-first eviction.
//!
//! Backs the live metric windows and the per-process fill archive. Slots are
//! addressed by logical position: 0 is the oldest element, `len() - 1` the
//! newest.

use std::num::NonZeroUsize;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("ring buffer capacity must be greater than zero")]
    ZeroCapacity,

    #[error("ring buffer is empty")]
    Empty,

    #[error("index {index} out of range for ring buffer of length {len}")]
    Index { index: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        NonZeroUsize::new(capacity)
            .map(Self::with_capacity)
            .ok_or(BufferError::ZeroCapacity)
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        let slots = std::iter::repeat_with(|| None).take(capacity.get()).collect();
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    fn physical(&self, logical: usize) -> usize {
        (self.head + logical) % self.capacity()
    }

    /// Append `item`. When full, the oldest element is evicted and returned.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.is_full() {
            let evicted = self.slots[self.head].replace(item);
            self.head = self.physical(1);
            evicted
        } else {
            let tail = self.physical(self.len);
            self.slots[tail] = Some(item);
            self.len += 1;
            None
        }
    }

    pub fn peek_first(&self) -> Result<&T, BufferError> {
        self.get(0).map_err(|_| BufferError::Empty)
    }

    pub fn peek_last(&self) -> Result<&T, BufferError> {
        match self.len {
            0 => Err(BufferError::Empty),
            n => self.get(n - 1),
        }
    }

    /// Evict and return the oldest element.
    pub fn remove_first(&mut self) -> Result<T, BufferError> {
        if self.len == 0 {
            return Err(BufferError::Empty);
        }
        let item = self.slots[self.head].take().ok_or(BufferError::Empty)?;
        self.head = self.physical(1);
        self.len -= 1;
        Ok(item)
    }

    /// Evict from the front for as long as `pred` holds. Returns how many went.
    pub fn remove_while<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let mut removed = 0;
        while let Ok(first) = self.peek_first() {
            if !pred(first) {
                break;
            }
            if self.remove_first().is_err() {
                break;
            }
            removed += 1;
        }
        removed
    }

    pub fn get(&self, index: usize) -> Result<&T, BufferError> {
        if index >= self.len {
            return Err(BufferError::Index {
                index,
                len: self.len,
            });
        }
        self.slots[self.physical(index)]
            .as_ref()
            .ok_or(BufferError::Index {
                index,
                len: self.len,
            })
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        (0..self.len).filter_map(move |i| self.slots[self.physical(i)].as_ref())
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Snapshot in logical order.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// Snapshot into a caller-owned vector, reusing its allocation.
    pub fn copy_into(&self, dest: &mut Vec<T>) {
        dest.clear();
        dest.reserve(self.len);
        dest.extend(self.iter().cloned());
    }
}
