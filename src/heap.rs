//! Bounded internal heap.

use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::mem;

/// Total order injected into a heap.
///
/// The same ordering instance drives the insertion buffer, the deletion
/// buffer and every merge head heap, so an element's rank is consistent
/// across the whole queue. Implementations must define a strict weak
/// ordering; the element that no other element precedes is the one `peek`
/// and `pop` surface first.
pub trait Compare<T> {
    fn compare(&self, a: &T, b: &T) -> Ordering;
}

/// Adapter turning a plain comparison function into a [`Compare`] instance.
#[derive(Clone, Copy)]
pub struct OrderBy<F>(pub F);

impl<T, F> Compare<T> for OrderBy<F>
where
    F: Fn(&T, &T) -> Ordering,
{
    fn compare(&self, a: &T, b: &T) -> Ordering {
        (self.0)(a, b)
    }
}

/// Error returned when inserting into a heap that is already at capacity.
///
/// The queue engine flushes buffers before they fill, so hitting this from
/// the public API indicates an orchestration bug rather than user error.
#[derive(Debug)]
pub struct CapacityError {
    capacity: usize,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap is at capacity ({} elements)", self.capacity)
    }
}

impl Error for CapacityError {}

/// Fixed-capacity array-based binary heap.
///
/// The heap never reallocates past its capacity: `insert` refuses elements
/// once full and the caller is expected to drain or flush first.
pub struct BoundedHeap<T, C> {
    items: Vec<T>,
    capacity: usize,
    order: C,
}

impl<T, C> BoundedHeap<T, C>
where
    C: Compare<T>,
{
    pub fn new(capacity: usize, order: C) -> Self {
        BoundedHeap {
            items: Vec::with_capacity(capacity),
            capacity,
            order,
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

    /// Returns the extremal element without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Inserts `item`, sifting it up to its heap position.
    pub fn insert(&mut self, item: T) -> Result<(), CapacityError> {
        if self.is_full() {
            return Err(CapacityError {
                capacity: self.capacity,
            });
        }

        self.items.push(item);
        self.sift_up(self.items.len() - 1);

        Ok(())
    }

    /// Removes and returns the extremal element.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }

        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let extremal = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }

        extremal
    }

    /// Removes every element, returning them in unspecified order.
    /// The heap keeps a reservation for its full capacity.
    pub fn take_all(&mut self) -> Vec<T> {
        mem::replace(&mut self.items, Vec::with_capacity(self.capacity))
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.order.compare(&self.items[idx], &self.items[parent]) != Ordering::Less {
                break;
            }
            self.items.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;

            let mut first = idx;
            if left < len && self.order.compare(&self.items[left], &self.items[first]) == Ordering::Less {
                first = left;
            }
            if right < len && self.order.compare(&self.items[right], &self.items[first]) == Ordering::Less {
                first = right;
            }
            if first == idx {
                break;
            }

            self.items.swap(idx, first);
            idx = first;
        }
    }
}
