use crate::{
    Completion, Error, Passthrough, Promise, PromisePool, Result, Shape, Sink, Slot, Snapshot,
    Value, Waiter,
};

/// Combinator state object that adopts the outcome of whichever source settles first.
///
/// No pending count is needed: the first notification settles the combinator and every later
/// one merely loses. Each passthrough keeps the state object alive until its source reports.
pub(crate) struct RaceState<T> {
    completion: Completion<T>,
}

impl<T: Value> Shape for RaceState<T> {
    type Output = T;

    fn new() -> Self {
        Self {
            completion: Completion::new(),
        }
    }

    fn completion(&self) -> &Completion<T> {
        &self.completion
    }

    unsafe fn reset(&self) {
        // SAFETY: Forwarding the exclusivity guarantee from the caller.
        unsafe {
            self.completion.reset();
        }
    }
}

impl<T: Value> Sink<T> for Slot<RaceState<T>> {
    fn accept(&self, _index: usize, source: &Completion<T>) {
        let outcome = source
            .outcome()
            .expect("sources only report in after settling");

        if self.completion.settle(outcome.clone()).is_err() {
            // Lost the race. Nobody will ever look at this outcome.
            source.suppress_unhandled_report();
        }
    }
}

pub(crate) fn race<T: Value>(
    pool: &PromisePool,
    sources: impl IntoIterator<Item = Promise<T>>,
) -> Result<Promise<T>> {
    let mut snapshots = sources
        .into_iter()
        .map(Promise::snapshot)
        .collect::<Vec<_>>();

    if snapshots.is_empty() {
        return Err(Error::NoSources { combinator: "race" });
    }

    // An already-resolved source wins outright. Only without one does the first settled
    // failure in input order decide.
    let decided = snapshots
        .iter()
        .position(Snapshot::is_resolved)
        .or_else(|| snapshots.iter().position(Snapshot::is_settled));

    if let Some(index) = decided {
        let Snapshot::Settled(outcome) = snapshots.swap_remove(index) else {
            unreachable!("position() found a settled snapshot at this index");
        };

        for loser in snapshots {
            loser.discard();
        }

        return Ok(Promise::from_outcome(outcome));
    }

    let lease = pool.acquire::<RaceState<T>>();
    let promise = pool.track(lease.clone());

    for (index, snapshot) in snapshots.into_iter().enumerate() {
        if let Snapshot::Pending(source) = snapshot {
            source.subscribe(Waiter::Aggregate(Passthrough::new(
                lease.clone().into_sink(),
                index,
            )));
        }
    }

    Ok(promise)
}
