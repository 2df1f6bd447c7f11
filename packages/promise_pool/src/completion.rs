use std::cell::UnsafeCell;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::task::Waker;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{Outcome, Rejection, Signal, Value, Waiter};

// Lifecycle of a completion. The transition is always PENDING -> SETTLING -> SETTLED; only
// recycling of the containing slot brings it back to PENDING.
//
// SETTLING is held by exactly one thread (whoever won the compare-exchange out of PENDING)
// while it writes the outcome; nobody reads the outcome until SETTLED is published.
const PENDING: u8 = 0;
const SETTLING: u8 = 1;
const SETTLED: u8 = 2;

/// The completable unit at the heart of every pooled state object.
///
/// Holds the lifecycle, the outcome (written exactly once) and the waiters that want to hear
/// about the outcome. Lifecycle and outcome are synchronized via `lifecycle` alone; the waiter
/// list is guarded by a short lock scoped to this object, which also serves as the single
/// decision point between "append a waiter" and "already settled, notify now".
pub(crate) struct Completion<T> {
    /// See constants above.
    lifecycle: AtomicU8,

    /// Initialized iff `lifecycle` is `SETTLED`. Written only by the thread that moved the
    /// lifecycle into `SETTLING`, cleared only by `reset()` under exclusive access.
    outcome: UnsafeCell<Option<Outcome<T>>>,

    waiters: Mutex<WaiterList<T>>,

    /// Set when any consumer has looked at (or subscribed to) the outcome.
    observed: AtomicBool,

    /// Set when a rejection is known to be intentionally discarded and must not be
    /// reported as unhandled.
    suppressed: AtomicBool,
}

struct WaiterList<T> {
    /// Once closed, the waiters have been drained and new arrivals are notified immediately.
    closed: bool,

    entries: SmallVec<[Waiter<T>; 2]>,

    /// The most recent async task polling this completion. Replaced on every poll.
    task: Option<Waker>,
}

// SAFETY: The outcome cell is only written while exclusively owning the SETTLING state (or by
// `reset()`, which requires exclusive access) and only read after observing SETTLED with
// Acquire ordering, at which point it is immutable. Shared readers on other threads only ever
// get `&Outcome<T>`, which is sound because `T: Sync`; the value may be cloned out or dropped
// on another thread, which is sound because `T: Send`.
unsafe impl<T: Send + Sync> Sync for Completion<T> {}

impl<T: Value> Completion<T> {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: AtomicU8::new(PENDING),
            outcome: UnsafeCell::new(None),
            waiters: Mutex::new(WaiterList {
                closed: false,
                entries: SmallVec::new(),
                task: None,
            }),
            observed: AtomicBool::new(false),
            suppressed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == SETTLED
    }

    /// The outcome, if settled.
    ///
    /// The returned reference stays valid for as long as the caller keeps a logical reference
    /// to the containing slot, as only recycling clears it.
    pub(crate) fn outcome(&self) -> Option<&Outcome<T>> {
        if !self.is_settled() {
            return None;
        }

        // SAFETY: We observed SETTLED with Acquire ordering, synchronizing with the Release
        // store that followed the write. The cell is not mutated again until `reset()`, which
        // cannot happen while our caller holds a logical reference.
        let outcome = unsafe { &*self.outcome.get() };

        outcome.as_ref()
    }

    /// Same as [`outcome()`][Self::outcome] but records that a consumer has seen the result.
    pub(crate) fn observe(&self) -> Option<&Outcome<T>> {
        self.observed.store(true, Ordering::Relaxed);
        self.outcome()
    }

    /// Transitions out of the pending state and notifies every registered waiter.
    ///
    /// Exactly one call per lifetime succeeds. Any later (or concurrently losing) call gets
    /// its outcome handed back untouched.
    #[cfg_attr(test, mutants::skip)] // Critical primitive - causes test timeouts if tampered.
    pub(crate) fn settle(&self, outcome: Outcome<T>) -> Result<(), Outcome<T>> {
        if self
            .lifecycle
            .compare_exchange(PENDING, SETTLING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(outcome);
        }

        // SAFETY: Winning the transition into SETTLING grants exclusive write access to the
        // cell. Readers only touch it after observing SETTLED, which we have not published.
        unsafe {
            *self.outcome.get() = Some(outcome);
        }

        self.lifecycle.store(SETTLED, Ordering::Release);

        let (entries, task) = {
            let mut list = self.waiters.lock();
            list.closed = true;
            (mem::take(&mut list.entries), list.task.take())
        };

        // Notifications happen outside the lock - a waiter may well come back to us (e.g. a
        // continuation reading the outcome or subscribing again).
        for waiter in entries {
            waiter.notify(self);
        }

        if let Some(task) = task {
            task.wake();
        }

        Ok(())
    }

    /// Registers a waiter, or notifies it immediately if the outcome is already known.
    pub(crate) fn subscribe(&self, waiter: Waiter<T>) {
        self.observed.store(true, Ordering::Relaxed);

        {
            let mut list = self.waiters.lock();

            if !list.closed {
                list.entries.push(waiter);
                return;
            }
        }

        waiter.notify(self);
    }

    /// Removes the blocking waiter parked on `signal`, if it is still registered.
    ///
    /// A timed-out wait calls this so that repeated timed waits on a slow operation do not
    /// pile up waiters.
    pub(crate) fn unsubscribe_wake(&self, signal: &Arc<Signal>) {
        self.waiters.lock().entries.retain(
            |waiter| !matches!(waiter, Waiter::Wake(registered) if Arc::ptr_eq(registered, signal)),
        );
    }

    /// Async counterpart of [`subscribe()`][Self::subscribe]: returns the outcome if settled,
    /// otherwise stores the waker (replacing any previous one) to be woken on settlement.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<&Outcome<T>> {
        self.observed.store(true, Ordering::Relaxed);

        {
            let mut list = self.waiters.lock();

            if !list.closed {
                match &mut list.task {
                    Some(existing) if existing.will_wake(waker) => {}
                    task => *task = Some(waker.clone()),
                }

                return None;
            }
        }

        // Closed implies settled; the lock we just released carried the happens-before edge.
        self.outcome()
    }

    pub(crate) fn suppress_unhandled_report(&self) {
        self.suppressed.store(true, Ordering::Relaxed);
    }

    /// A rejection that nobody ever looked at and nobody chose to discard.
    pub(crate) fn unreported_rejection(&self) -> Option<Rejection> {
        if self.observed.load(Ordering::Relaxed) || self.suppressed.load(Ordering::Relaxed) {
            return None;
        }

        self.outcome()
            .and_then(Outcome::rejection)
            .map(Rejection::clone)
    }

    /// Returns the completion to the pending state, dropping any outcome and waiters.
    ///
    /// # Safety
    ///
    /// The caller must guarantee exclusive access: no logical reference to the containing
    /// slot may exist, so nobody can be reading the outcome or settling concurrently.
    pub(crate) unsafe fn reset(&self) {
        // SAFETY: Forwarding the exclusivity guarantee from the caller.
        let outcome = unsafe { &mut *self.outcome.get() };
        *outcome = None;

        {
            let mut list = self.waiters.lock();
            list.closed = false;
            list.entries.clear();
            list.task = None;
        }

        self.observed.store(false, Ordering::Relaxed);
        self.suppressed.store(false, Ordering::Relaxed);
        self.lifecycle.store(PENDING, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.lock().entries.len()
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lifecycle = match self.lifecycle.load(Ordering::Relaxed) {
            PENDING => "pending",
            SETTLING => "settling",
            _ => "settled",
        };

        f.debug_struct("Completion")
            .field("lifecycle", &lifecycle)
            .field("observed", &self.observed.load(Ordering::Relaxed))
            .field("suppressed", &self.suppressed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
