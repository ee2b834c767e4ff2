use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed-capacity circular history shared between the sampling task and
/// readers.
///
/// Every access goes through one mutex per buffer. `add` overwrites the
/// oldest slot once the buffer is full; the logical count keeps growing so
/// callers can tell how many items were ever added (warm-up detection).
pub struct RingBuffer<T> {
    capacity: usize,
    inner: Mutex<Slots<T>>,
}

struct Slots<T> {
    items: Vec<Option<T>>,
    /// Next slot to write.
    cursor: usize,
    /// Total items ever added since construction or the last `clear`.
    count: u64,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, RingError> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(Slots::empty(capacity)),
        })
    }

    /// Store `item` at the cursor and advance it, evicting the oldest item
    /// when full.
    pub fn add(&self, item: T) {
        let mut slots = self.lock();
        let cursor = slots.cursor;
        slots.items[cursor] = Some(item);
        slots.cursor = (cursor + 1) % self.capacity;
        slots.count += 1;
    }

    /// Most recently added item, or `None` if nothing was added yet.
    pub fn latest(&self) -> Option<T> {
        let slots = self.lock();
        let newest = (slots.cursor + self.capacity - 1) % self.capacity;
        slots.items[newest].clone()
    }

    /// Retained items, newest first. Holds `min(capacity, count)` entries.
    pub fn snapshot(&self) -> Vec<T> {
        let slots = self.lock();
        let live = (slots.count.min(self.capacity as u64)) as usize;
        (1..=live)
            .filter_map(|back| {
                let idx = (slots.cursor + self.capacity - back) % self.capacity;
                slots.items[idx].clone()
            })
            .collect()
    }

    /// The `n` newest items, newest first; `None` until `n` items are retained.
    pub fn newest(&self, n: usize) -> Option<Vec<T>> {
        let items = self.snapshot();
        if items.len() < n {
            return None;
        }
        Some(items.into_iter().take(n).collect())
    }

    pub fn count(&self) -> u64 {
        self.lock().count
    }

    pub fn clear(&self) {
        *self.lock() = Slots::empty(self.capacity);
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        // Slot updates cannot leave the buffer half-written, so a poisoned
        // lock still guards consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Slots<T> {
    fn empty(capacity: usize) -> Self {
        Self {
            items: (0..capacity).map(|_| None).collect(),
            cursor: 0,
            count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RingError {
    #[error("ring buffer capacity must be at least 1")]
    ZeroCapacity,
}
