use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    Completion, Outcome, Promise, PromisePool, ResultCell, Sealed, Shape, Snapshot, Value, Waiter,
};

/// A tuple of promises that [`PromisePool::merge()`] can join into a promise of a tuple.
///
/// Implemented for tuples of 2 to 8 promises of any value types.
///
/// This is a sealed trait and exists for internal use only. You never need to implement it.
#[expect(private_bounds, reason = "intentional - sealed trait")]
pub trait Merge: Sealed {
    /// The tuple of values the merged promise resolves with.
    type Output: Value;

    #[doc(hidden)]
    fn merge_into(self, pool: &PromisePool) -> Promise<Self::Output>;
}

/// One write-once cell per tuple field.
pub(crate) trait TupleCells: Send + Sync + 'static {
    type Output: Value;

    fn new() -> Self;

    /// # Safety
    ///
    /// Every cell must have been written, and all writes must have happened-before this call.
    unsafe fn take(&self) -> Option<Self::Output>;

    /// # Safety
    ///
    /// The caller must have exclusive access to the containing combinator.
    unsafe fn clear(&self);
}

/// Combinator state object that joins a fixed set of heterogeneous sources into a tuple.
pub(crate) struct MergeState<C: TupleCells> {
    completion: Completion<C::Output>,

    /// Sources that have not reported in yet, plus one while the combinator is being assembled.
    pending: AtomicUsize,

    cells: C,
}

impl<C: TupleCells> MergeState<C> {
    /// Records the outcome of the source feeding `cell`.
    fn accept_field<V: Value>(&self, source: &Completion<V>, cell: impl FnOnce(&C) -> &ResultCell<V>) {
        match source.outcome() {
            Some(Outcome::Resolved(value)) => {
                // SAFETY: Each field is fed by exactly one source, which reports exactly once.
                // The final read only happens after our decrement below.
                unsafe {
                    cell(&self.cells).write(value.clone());
                }
            }
            Some(failure) => {
                if let Some(failure) = failure.failure_as::<C::Output>() {
                    if self.completion.settle(failure).is_err() {
                        source.suppress_unhandled_report();
                    }
                }
            }
            None => unreachable!("sources only report in after settling"),
        }

        self.arrive();
    }

    fn arrive(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if self.completion.is_settled() {
            return;
        }

        // SAFETY: The pending count reached zero, so every field has been written and nobody
        // writes any more.
        let values = unsafe { self.cells.take() }
            .expect("every field is written before the pending count reaches zero");

        let settled = self.completion.settle(Outcome::Resolved(values)).is_ok();
        debug_assert!(settled, "merge combinator settled twice");
    }
}

impl<C: TupleCells> Shape for MergeState<C> {
    type Output = C::Output;

    fn new() -> Self {
        Self {
            completion: Completion::new(),
            pending: AtomicUsize::new(0),
            cells: C::new(),
        }
    }

    fn completion(&self) -> &Completion<C::Output> {
        &self.completion
    }

    unsafe fn reset(&self) {
        // SAFETY: Forwarding the exclusivity guarantee from the caller.
        unsafe {
            self.completion.reset();
            self.cells.clear();
        }

        self.pending.store(0, Ordering::Relaxed);
    }
}

macro_rules! impl_merge {
    ($($value:ident $source:ident $index:tt),+) => {
        impl<$($value: Value),+> TupleCells for ($(ResultCell<$value>,)+) {
            type Output = ($($value,)+);

            fn new() -> Self {
                ($(ResultCell::<$value>::new(),)+)
            }

            unsafe fn take(&self) -> Option<Self::Output> {
                // SAFETY: Forwarding guarantees from the caller.
                unsafe { Some(($(self.$index.take()?,)+)) }
            }

            unsafe fn clear(&self) {
                // SAFETY: Forwarding guarantees from the caller.
                unsafe {
                    $(self.$index.clear();)+
                }
            }
        }

        impl<$($value: Value),+> Sealed for ($(Promise<$value>,)+) {}

        impl<$($value: Value),+> Merge for ($(Promise<$value>,)+) {
            type Output = ($($value,)+);

            fn merge_into(self, pool: &PromisePool) -> Promise<Self::Output> {
                let ($($source,)+) = self;
                $(let $source = $source.snapshot();)+

                // The first failure in input order among already-settled sources decides.
                let failure = None $(.or_else(|| $source.failure_as::<Self::Output>()))+;

                if let Some(failure) = failure {
                    $($source.discard();)+
                    return Promise::from_outcome(failure);
                }

                // Everything already resolved.
                let ($($source,)+) = match ($($source,)+) {
                    ($(Snapshot::Settled(Outcome::Resolved($source)),)+) => {
                        return Promise::resolved(($($source,)+));
                    }
                    sources => sources,
                };

                let lease = pool.acquire::<MergeState<($(ResultCell<$value>,)+)>>();

                // Construction guard.
                lease.pending.store(1, Ordering::Relaxed);

                let promise = pool.track(lease.clone());

                $(
                    match $source {
                        Snapshot::Settled(outcome) => {
                            // Already-settled sources are all resolved, we checked above.
                            if let Outcome::Resolved(value) = outcome {
                                // SAFETY: Each field is written by exactly one party.
                                unsafe {
                                    lease.cells.$index.write(value);
                                }
                            }
                        }
                        Snapshot::Pending(source) => {
                            lease.pending.fetch_add(1, Ordering::Relaxed);

                            let writer = lease.clone();
                            source.subscribe(Waiter::Resume(Box::new(
                                move |completion: &Completion<$value>| {
                                    writer.accept_field(completion, |cells| &cells.$index);
                                },
                            )));
                        }
                    }
                )+

                lease.arrive();

                promise
            }
        }
    };
}

impl_merge!(A a 0, B b 1);
impl_merge!(A a 0, B b 1, C c 2);
impl_merge!(A a 0, B b 1, C c 2, D d 3);
impl_merge!(A a 0, B b 1, C c 2, D d 3, E e 4);
impl_merge!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5);
impl_merge!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6);
impl_merge!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5, G g 6, H h 7);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Rejection;

    #[test]
    fn heterogeneous_pair() {
        let pool = PromisePool::new();
        let (name, pn) = pool.deferred::<String>();
        let (count, pc) = pool.deferred::<usize>();

        let merged = (pn, pc).merge_into(&pool);

        count.resolve(3);
        assert!(!merged.is_settled());
        name.resolve("three".to_string());

        assert_eq!(merged.wait(), Outcome::Resolved(("three".to_string(), 3)));
    }

    #[test]
    fn settled_inputs_merge_inline() {
        let pool = PromisePool::new();

        let merged = (Promise::resolved(1_u8), Promise::resolved('x'), Promise::resolved(true))
            .merge_into(&pool);

        assert_eq!(merged.wait(), Outcome::Resolved((1, 'x', true)));
        assert!(merged.handle().is_none());
        assert_eq!(pool.stats().allocated, 0);
    }

    #[test]
    fn already_failed_field_decides_inline() {
        let pool = PromisePool::new();
        let (_pending, pending) = pool.deferred::<u32>();
        let rejection = Rejection::msg("bad field");

        let merged = (
            pending,
            Promise::<&str>::rejected(rejection.clone()),
            Promise::<u8>::canceled(),
        )
            .merge_into(&pool);

        assert_eq!(merged.wait(), Outcome::Rejected(rejection));
        assert!(merged.handle().is_none());
    }

    #[test]
    fn pending_failure_settles_immediately() {
        let pool = PromisePool::new();
        let (a, pa) = pool.deferred::<u32>();
        let (b, pb) = pool.deferred::<String>();

        let merged = (pa, pb, Promise::resolved(0_i64)).merge_into(&pool);

        a.cancel();
        assert_eq!(merged.try_outcome(), Some(Outcome::Canceled));

        b.resolve("late".to_string());
    }

    #[test]
    fn widest_tuple() {
        let pool = PromisePool::new();
        let (h, ph) = pool.deferred::<u64>();

        let merged = (
            Promise::resolved(0_u8),
            Promise::resolved(1_u16),
            Promise::resolved(2_u32),
            Promise::resolved(3_i8),
            Promise::resolved(4_i16),
            Promise::resolved(5_i32),
            Promise::resolved(6_i64),
            ph,
        )
            .merge_into(&pool);

        h.resolve(7);

        assert_eq!(
            merged.wait(),
            Outcome::Resolved((0, 1, 2, 3, 4, 5, 6, 7))
        );
    }
}
