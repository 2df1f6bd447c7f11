//! Pooled state objects and the logical references that keep them alive.
//!
//! Every state object lives in an `Arc<Slot<S>>`. The `Arc` only keeps the memory alive; the
//! *logical* lifetime of the operation occupying the slot is tracked separately by `refs`.
//! When the logical count reaches zero the slot is reset, its generation is bumped and it goes
//! back on its shelf to be reissued for an unrelated operation. Anything that kept just the
//! memory alive (a [`Handle`][crate::Handle]) can tell it has been left behind by comparing
//! generations.

use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::atomic::{self, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::{Completion, Diagnostics, Shelf, Sink, Value};

/// The layout of one kind of pooled state object (plain, All, Race, First, Merge).
pub(crate) trait Shape: Send + Sync + Sized + 'static {
    /// The type of value the state object settles with.
    type Output: Value;

    fn new() -> Self;

    fn completion(&self) -> &Completion<Self::Output>;

    /// Returns the shape to its freshly constructed state.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that no logical reference to the containing slot exists.
    unsafe fn reset(&self);
}

/// Object-safe view of a pooled slot's reference counting.
pub(crate) trait Pooled: Send + Sync {
    fn generation(&self) -> u32;

    /// Adds a logical reference.
    ///
    /// # Panics
    ///
    /// Panics if there were no logical references (the operation has already ended).
    fn retain(&self);

    /// Adds a logical reference only if at least one still exists.
    fn try_retain(&self) -> bool;

    /// Drops a logical reference, recycling the slot if it was the last one.
    fn release(self: Arc<Self>);
}

/// A pooled slot that can be observed as a completion of `T`.
pub(crate) trait Source<T>: Pooled {
    fn completion(&self) -> &Completion<T>;
}

pub(crate) struct Slot<S> {
    /// Bumped every time the slot is recycled.
    generation: AtomicU32,

    /// Logical references: owning handles plus internal waiter retentions.
    refs: AtomicUsize,

    /// Where the slot goes back to when recycled. If the pool is gone, the slot is freed.
    shelf: Weak<Shelf<S>>,

    diagnostics: Arc<Diagnostics>,

    body: S,
}

impl<S: Shape> Slot<S> {
    /// Creates a slot holding one logical reference.
    pub(crate) fn new(shelf: Weak<Shelf<S>>, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            generation: AtomicU32::new(0),
            refs: AtomicUsize::new(1),
            shelf,
            diagnostics,
            body: S::new(),
        }
    }

    /// Reissues an idle slot for a new operation, giving it one logical reference.
    ///
    /// Must only be called on a slot taken off its shelf.
    pub(crate) fn reissue(&self) {
        // Release pairs with the Acquire in `try_retain()` so that a handle that manages to
        // retain the reissued slot also observes the generation bump that preceded it.
        let previous = self.refs.swap(1, Ordering::Release);

        assert_eq!(
            previous, 0,
            "reissued a slot that still had logical references - pool bookkeeping is corrupted"
        );
    }

    fn recycle(self: Arc<Self>) {
        if let Some(rejection) = self.body.completion().unreported_rejection() {
            self.diagnostics.report_unhandled(&rejection);
        }

        // SAFETY: The logical reference count just reached zero, so nobody can access the
        // body through a logical reference. Handles that only keep the memory alive never
        // touch the body without first retaining a logical reference, which fails at zero.
        unsafe {
            self.body.reset();
        }

        // Wrapping is fine; a handle would have to survive 2^32 reuses to be confused.
        self.generation.fetch_add(1, Ordering::Release);

        if let Some(shelf) = self.shelf.upgrade() {
            shelf.put_back(self);
        }
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Relaxed)
    }
}

impl<S: Shape> Pooled for Slot<S> {
    fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    fn retain(&self) {
        assert_ne!(
            0,
            self.refs.fetch_add(1, Ordering::Relaxed),
            "retained a state object with no logical references (resurrection)"
        );
    }

    fn try_retain(&self) -> bool {
        let mut current = self.refs.load(Ordering::Relaxed);

        loop {
            if current == 0 {
                return false;
            }

            let next = current
                .checked_add(1)
                .expect("reference count overflow - indicates a serious bug in reference counting logic");

            match self.refs.compare_exchange_weak(
                current,
                next,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(self: Arc<Self>) {
        match self.refs.fetch_sub(1, Ordering::Release) {
            1 => {
                // We need an Acquire fence here to ensure we have observed all writes made
                // through other references before the slot is reset.
                atomic::fence(Ordering::Acquire);

                self.recycle();
            }
            0 => panic!(
                "reference count underflow - indicates a serious bug in reference counting logic"
            ),
            _ => {}
        }
    }
}

impl<S: Shape> Source<S::Output> for Slot<S> {
    fn completion(&self) -> &Completion<S::Output> {
        self.body.completion()
    }
}

impl<S> Deref for Slot<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.body
    }
}

impl<S> fmt::Debug for Slot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// One counted logical reference to a pooled slot.
///
/// Cloning retains, dropping releases. While any lease exists, the slot cannot be recycled.
pub(crate) struct Lease<P: ?Sized + Pooled> {
    slot: ManuallyDrop<Arc<P>>,
}

impl<P: ?Sized + Pooled> Lease<P> {
    /// Wraps a slot whose logical reference count already includes this lease.
    ///
    /// # Safety
    ///
    /// The caller must transfer ownership of exactly one already-counted logical reference.
    pub(crate) unsafe fn adopt(slot: Arc<P>) -> Self {
        Self {
            slot: ManuallyDrop::new(slot),
        }
    }

    /// The slot's memory, without a logical reference.
    pub(crate) fn memory(&self) -> Arc<P> {
        Arc::clone(&self.slot)
    }

    /// Gives up the lease without releasing its logical reference.
    fn into_counted(self) -> Arc<P> {
        let mut this = ManuallyDrop::new(self);

        // SAFETY: `this` is never used or dropped again, so the Arc is moved out exactly once.
        unsafe { ManuallyDrop::take(&mut this.slot) }
    }
}

impl<S: Shape> Lease<Slot<S>> {
    /// Re-types the lease as an observable source of the shape's output.
    pub(crate) fn into_source(self) -> Lease<dyn Source<S::Output>> {
        let slot: Arc<dyn Source<S::Output>> = self.into_counted();

        // SAFETY: The logical reference moves from the old lease to the new one.
        unsafe { Lease::adopt(slot) }
    }

    /// Re-types the lease as a combinator sink accepting outcomes of `T`.
    pub(crate) fn into_sink<T>(self) -> Lease<dyn Sink<T>>
    where
        Slot<S>: Sink<T>,
    {
        let slot: Arc<dyn Sink<T>> = self.into_counted();

        // SAFETY: The logical reference moves from the old lease to the new one.
        unsafe { Lease::adopt(slot) }
    }
}

impl<P: ?Sized + Pooled> Clone for Lease<P> {
    fn clone(&self) -> Self {
        self.slot.retain();

        Self {
            slot: ManuallyDrop::new(Arc::clone(&self.slot)),
        }
    }
}

impl<P: ?Sized + Pooled> Drop for Lease<P> {
    fn drop(&mut self) {
        // SAFETY: We are being dropped, so the Arc is moved out exactly once.
        let slot = unsafe { ManuallyDrop::take(&mut self.slot) };

        slot.release();
    }
}

impl<P: ?Sized + Pooled> Deref for Lease<P> {
    type Target = P;

    fn deref(&self) -> &Self::Target {
        &self.slot
    }
}

impl<P: ?Sized + Pooled> fmt::Debug for Lease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("generation", &self.slot.generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{Deferred, Outcome, Rejection, Recycler, RecyclerConfig};

    assert_impl_all!(Lease<Slot<Deferred<u32>>>: Send, Sync);
    assert_impl_all!(Lease<dyn Source<u32>>: Send, Sync);

    fn recycler() -> Arc<Recycler> {
        Arc::new(Recycler::new(RecyclerConfig::default()))
    }

    #[test]
    fn clone_and_drop_track_refs() {
        let recycler = recycler();
        let lease = recycler.acquire::<Deferred<u32>>();
        assert_eq!(lease.ref_count(), 1);

        let clone = lease.clone();
        assert_eq!(lease.ref_count(), 2);

        drop(clone);
        assert_eq!(lease.ref_count(), 1);
    }

    #[test]
    fn last_release_bumps_generation() {
        let recycler = recycler();
        let lease = recycler.acquire::<Deferred<u32>>();
        let memory = lease.memory();
        let before = memory.generation();

        lease.completion().settle(Outcome::Resolved(1)).unwrap();
        drop(lease);

        assert_eq!(memory.generation(), before.wrapping_add(1));
        assert_eq!(memory.ref_count(), 0);
        assert!(!memory.try_retain());
    }

    #[test]
    fn recycled_slot_is_reset() {
        let recycler = recycler();
        let lease = recycler.acquire::<Deferred<u32>>();
        let memory = lease.memory();
        lease.completion().settle(Outcome::Resolved(1)).unwrap();
        drop(lease);

        let reissued = recycler.acquire::<Deferred<u32>>();
        assert!(Arc::ptr_eq(&memory, &reissued.memory()));
        assert!(!reissued.completion().is_settled());
    }

    #[test]
    fn erased_source_lease_releases_correctly() {
        let recycler = recycler();
        let lease = recycler.acquire::<Deferred<u32>>();
        let memory = lease.memory();

        let source = lease.clone().into_source();
        assert_eq!(memory.ref_count(), 2);

        source
            .completion()
            .settle(Outcome::Rejected(Rejection::msg("x")))
            .unwrap();
        source.completion().observe();

        drop(source);
        assert_eq!(memory.ref_count(), 1);
        drop(lease);
        assert_eq!(memory.ref_count(), 0);
    }

    #[test]
    #[should_panic]
    fn retain_after_last_release_panics() {
        let recycler = recycler();
        let lease = recycler.acquire::<Deferred<u32>>();
        let memory = lease.memory();
        drop(lease);

        memory.retain();
    }
}
