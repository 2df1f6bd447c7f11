use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    Completion, Outcome, Passthrough, Promise, PromisePool, ResultSlots, Shape, Sink, Slot,
    Snapshot, Value, Waiter,
};

/// Combinator state object that joins N sources of `T` into a `Vec<T>`.
pub(crate) struct AllState<T> {
    completion: Completion<Vec<T>>,

    /// Sources that have not reported in yet, plus one while the combinator is being assembled.
    pending: AtomicUsize,

    slots: ResultSlots<T>,
}

impl<T: Value> AllState<T> {
    fn arrive(&self) {
        // AcqRel: our own slot write must be visible to whoever reaches zero, and whoever
        // reaches zero must see every other source's slot write.
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        // A failure already decided the outcome; some slots may never have been written.
        if self.completion.is_settled() {
            return;
        }

        // SAFETY: The pending count reached zero, so every source has written its slot and
        // nobody writes any more.
        let values = unsafe { self.slots.take_all() };

        let settled = self.completion.settle(Outcome::Resolved(values)).is_ok();

        // Only a failure could have settled us, and every failure was delivered before the
        // count reached zero.
        debug_assert!(settled, "join-all combinator settled twice");
    }
}

impl<T: Value> Shape for AllState<T> {
    type Output = Vec<T>;

    fn new() -> Self {
        Self {
            completion: Completion::new(),
            pending: AtomicUsize::new(0),
            slots: ResultSlots::new(),
        }
    }

    fn completion(&self) -> &Completion<Vec<T>> {
        &self.completion
    }

    unsafe fn reset(&self) {
        // SAFETY: Forwarding the exclusivity guarantee from the caller.
        unsafe {
            self.completion.reset();
            self.slots.clear();
        }

        self.pending.store(0, Ordering::Relaxed);
    }
}

impl<T: Value> Sink<T> for Slot<AllState<T>> {
    fn accept(&self, index: usize, source: &Completion<T>) {
        match source.outcome() {
            Some(Outcome::Resolved(value)) => {
                // SAFETY: Each source has its own index and reports exactly once. The final
                // read only happens after our decrement below.
                unsafe {
                    self.slots.write(index, value.clone());
                }
            }
            Some(failure) => {
                if let Some(failure) = failure.failure_as::<Vec<T>>() {
                    // Only the first failure wins; later ones are discarded.
                    if self.completion.settle(failure).is_err() {
                        source.suppress_unhandled_report();
                    }
                }
            }
            None => unreachable!("sources only report in after settling"),
        }

        self.arrive();
    }
}

pub(crate) fn all<T: Value>(
    pool: &PromisePool,
    sources: impl IntoIterator<Item = Promise<T>>,
) -> Promise<Vec<T>> {
    let snapshots = sources
        .into_iter()
        .map(Promise::snapshot)
        .collect::<Vec<_>>();

    // The first failure in input order among already-settled sources decides the outcome.
    if let Some(failure) = snapshots.iter().find_map(Snapshot::failure_as::<Vec<T>>) {
        for snapshot in snapshots {
            snapshot.discard();
        }

        return Promise::from_outcome(failure);
    }

    // Also covers the empty input, which collects into an unallocated `Vec`.
    if snapshots.iter().all(Snapshot::is_settled) {
        return Promise::resolved(
            snapshots
                .into_iter()
                .filter_map(Snapshot::into_value)
                .collect(),
        );
    }

    let lease = pool.acquire::<AllState<T>>();

    // SAFETY: Freshly acquired, nobody else has seen this state object yet.
    unsafe {
        lease.slots.prepare(snapshots.len());
    }

    // Construction guard.
    lease.pending.store(1, Ordering::Relaxed);

    let promise = pool.track(lease.clone());

    for (index, snapshot) in snapshots.into_iter().enumerate() {
        match snapshot {
            Snapshot::Settled(outcome) => {
                // Already-settled sources are all resolved, we checked for failures above.
                if let Outcome::Resolved(value) = outcome {
                    // SAFETY: Each index is written by exactly one party.
                    unsafe {
                        lease.slots.write(index, value);
                    }
                }
            }
            Snapshot::Pending(source) => {
                lease.pending.fetch_add(1, Ordering::Relaxed);
                source.subscribe(Waiter::Aggregate(Passthrough::new(
                    lease.clone().into_sink(),
                    index,
                )));
            }
        }
    }

    lease.arrive();

    promise
}
