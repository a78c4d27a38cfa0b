use heapless::Deque;
use static_assertions::const_assert;
use thiserror::Error;

/// Hard upper bound on any buffer's capacity; storage is reserved inline.
pub const MAX_BUFFER_CAPACITY: usize = 256;
pub const DEFAULT_BUFFER_CAPACITY: usize = 40;

const_assert!(DEFAULT_BUFFER_CAPACITY <= MAX_BUFFER_CAPACITY);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer is empty")]
    Empty,
    #[error("capacity {requested} is outside 1..={max}")]
    InvalidCapacity { requested: usize, max: usize },
}

/// Fixed-capacity FIFO with drop-oldest eviction.
///
/// Used both as the rolling measurement window and as the delivery staging
/// buffer. No operation allocates or blocks.
#[derive(Debug)]
pub struct RingBuffer<T> {
    entries: Deque<T, MAX_BUFFER_CAPACITY>,
    capacity: usize,
    evicted: u64,
}

impl<T: Clone> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 || capacity > MAX_BUFFER_CAPACITY {
            return Err(BufferError::InvalidCapacity {
                requested: capacity,
                max: MAX_BUFFER_CAPACITY,
            });
        }

        Ok(Self {
            entries: Deque::new(),
            capacity,
            evicted: 0,
        })
    }

    /// Appends `item`, evicting and returning the oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.entries.len() >= self.capacity {
            self.evicted = self.evicted.wrapping_add(1);
            self.entries.pop_front()
        } else {
            None
        };

        // len < capacity <= MAX_BUFFER_CAPACITY here, so the deque has room
        let _ = self.entries.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Result<T, BufferError> {
        self.entries.pop_front().ok_or(BufferError::Empty)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Total number of entries dropped by the eviction rule since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Oldest-first view of the current contents.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// Pushes a copy of every current entry, oldest first, into `target`.
    ///
    /// The source is left untouched. `target` applies its own eviction rule,
    /// so a nearly full target may lose its oldest entries. Returns the
    /// number of entries copied.
    pub fn copy_to(&self, target: &mut RingBuffer<T>) -> usize {
        for entry in self.entries.iter() {
            target.push(entry.clone());
        }
        self.entries.len()
    }

    /// Removes entries oldest-first as they are iterated.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        core::iter::from_fn(move || self.entries.pop_front())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
