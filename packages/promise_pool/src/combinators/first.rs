use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    Completion, Error, Outcome, Passthrough, Promise, PromisePool, Result, ResultCell, Shape,
    Sink, Slot, Snapshot, Value, Waiter,
};

/// Combinator state object that adopts the first resolution among its sources.
///
/// Failures are waited out. If every source fails, the combinator adopts the fate of the last
/// source in input order, whichever order the failures actually arrived in.
pub(crate) struct FirstState<T> {
    completion: Completion<T>,

    /// Sources that have not reported in yet, plus one while the combinator is being assembled.
    pending: AtomicUsize,

    /// Input index of the source whose failure becomes our fate if nothing resolves.
    last_index: AtomicUsize,

    /// Written once, by the source at `last_index` if it fails.
    fallback: ResultCell<Outcome<T>>,
}

impl<T: Value> FirstState<T> {
    fn arrive(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if self.completion.is_settled() {
            return;
        }

        // SAFETY: The pending count reached zero, so the last source has reported in and
        // nobody writes the fallback any more.
        let fallback = unsafe { self.fallback.take() }
            .expect("nothing resolved, so the last source failed and recorded its fate");

        let settled = self.completion.settle(fallback).is_ok();
        debug_assert!(settled, "first-resolved combinator settled twice");
    }
}

impl<T: Value> Shape for FirstState<T> {
    type Output = T;

    fn new() -> Self {
        Self {
            completion: Completion::new(),
            pending: AtomicUsize::new(0),
            last_index: AtomicUsize::new(0),
            fallback: ResultCell::new(),
        }
    }

    fn completion(&self) -> &Completion<T> {
        &self.completion
    }

    unsafe fn reset(&self) {
        // SAFETY: Forwarding the exclusivity guarantee from the caller.
        unsafe {
            self.completion.reset();
            self.fallback.clear();
        }

        self.pending.store(0, Ordering::Relaxed);
        self.last_index.store(0, Ordering::Relaxed);
    }
}

impl<T: Value> Sink<T> for Slot<FirstState<T>> {
    fn accept(&self, index: usize, source: &Completion<T>) {
        let outcome = source
            .outcome()
            .expect("sources only report in after settling");

        if outcome.is_resolved() {
            if self.completion.settle(outcome.clone()).is_err() {
                // Someone else resolved first.
                source.suppress_unhandled_report();
            }
        } else if index == self.last_index.load(Ordering::Relaxed) {
            // SAFETY: Only the source at the last index writes the fallback, exactly once,
            // and it is read only after our decrement below.
            unsafe {
                self.fallback.write(outcome.clone());
            }
        }

        self.arrive();
    }
}

pub(crate) fn first<T: Value>(
    pool: &PromisePool,
    sources: impl IntoIterator<Item = Promise<T>>,
) -> Result<Promise<T>> {
    let mut snapshots = sources
        .into_iter()
        .map(Promise::snapshot)
        .collect::<Vec<_>>();

    let Some(last_index) = snapshots.len().checked_sub(1) else {
        return Err(Error::NoSources { combinator: "first" });
    };

    // An already-resolved source wins outright.
    if let Some(index) = snapshots.iter().position(Snapshot::is_resolved) {
        let Snapshot::Settled(outcome) = snapshots.swap_remove(index) else {
            unreachable!("position() found a settled snapshot at this index");
        };

        for other in snapshots {
            other.discard();
        }

        return Ok(Promise::from_outcome(outcome));
    }

    // Everything has failed already; the last source decides.
    if snapshots.iter().all(Snapshot::is_settled) {
        let fate = snapshots
            .pop()
            .and_then(Snapshot::into_outcome)
            .expect("a non-empty list of settled snapshots has a settled last entry");

        return Ok(Promise::from_outcome(fate));
    }

    let lease = pool.acquire::<FirstState<T>>();
    lease.last_index.store(last_index, Ordering::Relaxed);

    // Construction guard.
    lease.pending.store(1, Ordering::Relaxed);

    let promise = pool.track(lease.clone());

    for (index, snapshot) in snapshots.into_iter().enumerate() {
        match snapshot {
            Snapshot::Settled(failure) => {
                if index == last_index {
                    // SAFETY: The last source is settled, so no passthrough writes the
                    // fallback; we are its only writer.
                    unsafe {
                        lease.fallback.write(failure);
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

    Ok(promise)
}
