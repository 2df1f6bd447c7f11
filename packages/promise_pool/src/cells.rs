//! Write-once result storage for combinators.
//!
//! Each source of a combinator writes only its own cell, so writes need no synchronization
//! among themselves. The combinator's pending count provides the happens-before edge between
//! the writes and the final read: every write precedes that source's decrement, and the
//! read happens only after the count has reached zero.

use std::cell::UnsafeCell;
use std::fmt;

/// A single write-once cell.
pub(crate) struct ResultCell<T> {
    value: UnsafeCell<Option<T>>,
}

// SAFETY: Values are moved in on one thread and moved out on another, never shared, so only
// `T: Send` is needed. Exclusivity of each access is the responsibility of the unsafe methods'
// callers.
unsafe impl<T: Send> Sync for ResultCell<T> {}

impl<T> ResultCell<T> {
    pub(crate) const fn new() -> Self {
        Self {
            value: UnsafeCell::new(None),
        }
    }

    /// # Safety
    ///
    /// The caller must be the only writer of this cell in the current lifetime of the
    /// containing combinator and nobody may be reading it concurrently.
    pub(crate) unsafe fn write(&self, value: T) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            *self.value.get() = Some(value);
        }
    }

    /// # Safety
    ///
    /// The caller must guarantee that every write to this cell happened-before this call and
    /// that no write is in progress.
    pub(crate) unsafe fn take(&self) -> Option<T> {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe { (*self.value.get()).take() }
    }

    /// # Safety
    ///
    /// The caller must have exclusive access to the containing combinator.
    pub(crate) unsafe fn clear(&self) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            *self.value.get() = None;
        }
    }
}

impl<T> fmt::Debug for ResultCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCell").finish_non_exhaustive()
    }
}

/// A run of write-once cells, one per source, sized when the combinator is assembled.
///
/// The backing buffer keeps its capacity across recycling, so a pooled combinator reused for
/// a similar number of sources does not allocate.
pub(crate) struct ResultSlots<T> {
    cells: UnsafeCell<Vec<ResultCell<T>>>,
}

// SAFETY: See `ResultCell`. The vector itself is only mutated under exclusive access.
unsafe impl<T: Send> Sync for ResultSlots<T> {}

impl<T> ResultSlots<T> {
    pub(crate) const fn new() -> Self {
        Self {
            cells: UnsafeCell::new(Vec::new()),
        }
    }

    /// Sizes the slots for `len` sources, all empty.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the containing combinator.
    pub(crate) unsafe fn prepare(&self, len: usize) {
        // SAFETY: Forwarding guarantees from the caller.
        let cells = unsafe { &mut *self.cells.get() };

        cells.clear();
        cells.resize_with(len, ResultCell::new);
    }

    /// # Safety
    ///
    /// The slots must have been prepared with more than `index` entries, the caller must be
    /// the only writer of `index` in the current lifetime of the combinator, and the result
    /// must not be read concurrently.
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        // SAFETY: The vector is not resized outside exclusive access, so a shared view of it
        // is sound while sources write into individual cells.
        let cells = unsafe { &*self.cells.get() };

        let cell = cells
            .get(index)
            .expect("result slot index is within the prepared length");

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            cell.write(value);
        }
    }

    /// Moves every value out, in slot order.
    ///
    /// # Safety
    ///
    /// Every slot must have been written, and all writes must have happened-before this call.
    pub(crate) unsafe fn take_all(&self) -> Vec<T> {
        // SAFETY: See `write()`.
        let cells = unsafe { &*self.cells.get() };

        cells
            .iter()
            .map(|cell| {
                // SAFETY: Forwarding guarantees from the caller.
                unsafe { cell.take() }
                    .expect("every result slot is written before the pending count reaches zero")
            })
            .collect()
    }

    /// Drops all values, keeping the buffer for reuse.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to the containing combinator.
    pub(crate) unsafe fn clear(&self) {
        // SAFETY: Forwarding guarantees from the caller.
        let cells = unsafe { &mut *self.cells.get() };

        cells.clear();
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        // SAFETY: Test-only, single-threaded.
        unsafe { (*self.cells.get()).capacity() }
    }
}

impl<T> fmt::Debug for ResultSlots<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSlots").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn slots_return_values_in_index_order() {
        let slots = ResultSlots::<&str>::new();

        // SAFETY: Single-threaded test, each index written once.
        unsafe {
            slots.prepare(3);
            slots.write(2, "c");
            slots.write(0, "a");
            slots.write(1, "b");

            assert_eq!(slots.take_all(), vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn clear_keeps_capacity() {
        let slots = ResultSlots::<u64>::new();

        // SAFETY: Single-threaded test.
        unsafe {
            slots.prepare(16);
            slots.write(3, 3);
            slots.clear();
        }

        assert!(slots.capacity() >= 16);
    }

    #[test]
    #[should_panic]
    fn take_all_panics_on_missing_value() {
        let slots = ResultSlots::<u64>::new();

        // SAFETY: Single-threaded test.
        unsafe {
            slots.prepare(2);
            slots.write(0, 1);
            let _ = slots.take_all();
        }
    }

    #[test]
    fn cell_take_empties() {
        let cell = ResultCell::new();

        // SAFETY: Single-threaded test.
        unsafe {
            cell.write(5);
            assert_eq!(cell.take(), Some(5));
            assert_eq!(cell.take(), None);
        }
    }
}
