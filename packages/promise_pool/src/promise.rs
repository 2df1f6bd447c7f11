use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{
    Completion, Handle, Lease, Outcome, Pooled, PromisePool, Rejection, Shape, Signal, Slot,
    Source, Value, Waiter,
};

/// The result of an asynchronous operation that will exist later.
///
/// A promise either carries its outcome inline (when the outcome was known at creation time,
/// in which case nothing was allocated) or refers to a pooled state object that the producer
/// will settle. Clones observe the same operation.
///
/// There are several ways to receive the outcome:
///
/// * `.await` the promise (it is a [`Future`]).
/// * Block the current thread with [`wait()`][Self::wait] or
///   [`wait_timeout()`][Self::wait_timeout].
/// * Check without blocking via [`try_outcome()`][Self::try_outcome].
/// * Register a continuation such as [`on_resolve()`][Self::on_resolve].
///
/// # Example
///
/// ```rust
/// use promise_pool::{Outcome, PromisePool};
///
/// let pool = PromisePool::new();
/// let (resolver, promise) = pool.deferred::<String>();
///
/// assert!(promise.try_outcome().is_none());
///
/// resolver.resolve("done".to_string());
///
/// assert_eq!(promise.wait(), Outcome::Resolved("done".to_string()));
/// ```
pub struct Promise<T> {
    repr: Repr<T>,
}

pub(crate) enum Repr<T> {
    /// The outcome was known when the promise was created. No state object exists.
    Inline(Outcome<T>),

    Tracked(Tracked<T>),
}

impl<T: Value> Promise<T> {
    /// A promise that is already resolved with `value`. Does not allocate a state object.
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::from_outcome(Outcome::Resolved(value))
    }

    /// A promise that is already rejected. Does not allocate a state object.
    #[must_use]
    pub fn rejected(rejection: Rejection) -> Self {
        Self::from_outcome(Outcome::Rejected(rejection))
    }

    /// A promise that is already canceled. Does not allocate a state object.
    #[must_use]
    pub fn canceled() -> Self {
        Self::from_outcome(Outcome::Canceled)
    }

    pub(crate) fn from_outcome(outcome: Outcome<T>) -> Self {
        Self {
            repr: Repr::Inline(outcome),
        }
    }

    pub(crate) fn tracked(source: Lease<dyn Source<T>>, pool: PromisePool) -> Self {
        let generation = source.generation();

        Self {
            repr: Repr::Tracked(Tracked {
                source,
                generation,
                pool,
            }),
        }
    }

    /// Whether the operation has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match &self.repr {
            Repr::Inline(_) => true,
            Repr::Tracked(tracked) => tracked.completion().is_settled(),
        }
    }

    /// The outcome, if the operation has settled.
    ///
    /// Looking at a rejection this way counts as handling it.
    #[must_use]
    pub fn try_outcome(&self) -> Option<Outcome<T>> {
        match &self.repr {
            Repr::Inline(outcome) => Some(outcome.clone()),
            Repr::Tracked(tracked) => tracked.completion().observe().cloned(),
        }
    }

    /// Blocks the current thread until the operation settles.
    #[must_use]
    pub fn wait(&self) -> Outcome<T> {
        self.wait_until(None)
            .expect("an unbounded wait only returns once the operation has settled")
    }

    /// Blocks the current thread until the operation settles or `timeout` elapses.
    ///
    /// Returns `None` if the timeout elapsed first.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        // A timeout too large to represent is as good as no timeout.
        self.wait_until(Instant::now().checked_add(timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Option<Outcome<T>> {
        let tracked = match &self.repr {
            Repr::Inline(outcome) => return Some(outcome.clone()),
            Repr::Tracked(tracked) => tracked,
        };

        let completion = tracked.completion();

        if let Some(outcome) = completion.observe() {
            return Some(outcome.clone());
        }

        let signal = Arc::new(Signal::new());
        completion.subscribe(Waiter::Wake(Arc::clone(&signal)));

        if !signal.wait(deadline) {
            completion.unsubscribe_wake(&signal);

            // The operation may have settled between the timeout and the unsubscribe.
            return completion.outcome().cloned();
        }

        completion.outcome().cloned()
    }

    /// A non-owning handle for diagnostics.
    ///
    /// Returns `None` for a promise whose outcome is carried inline, as there is no state
    /// object to refer to.
    #[must_use]
    pub fn handle(&self) -> Option<Handle<T>> {
        match &self.repr {
            Repr::Inline(_) => None,
            Repr::Tracked(tracked) => Some(Handle::new(
                tracked.source.memory(),
                tracked.generation,
                tracked.pool.clone(),
            )),
        }
    }

    /// Marks a rejection of this operation as intentionally ignored, so it is not reported
    /// as unhandled when the state object is recycled.
    pub fn suppress_unhandled_report(&self) {
        if let Repr::Tracked(tracked) = &self.repr {
            tracked.completion().suppress_unhandled_report();
        }
    }

    pub(crate) fn into_repr(self) -> Repr<T> {
        self.repr
    }

    /// Captures what is known about the operation right now.
    pub(crate) fn snapshot(self) -> Snapshot<T> {
        match self.repr {
            Repr::Inline(outcome) => Snapshot::Settled(outcome),
            Repr::Tracked(tracked) => match tracked.completion().observe() {
                Some(outcome) => Snapshot::Settled(outcome.clone()),
                None => Snapshot::Pending(tracked),
            },
        }
    }
}

impl<T: Value> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            repr: match &self.repr {
                Repr::Inline(outcome) => Repr::Inline(outcome.clone()),
                Repr::Tracked(tracked) => Repr::Tracked(tracked.clone()),
            },
        }
    }
}

impl<T: Value> Future for Promise<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &self.get_mut().repr {
            Repr::Inline(outcome) => Poll::Ready(outcome.clone()),
            Repr::Tracked(tracked) => match tracked.completion().poll_outcome(cx.waker()) {
                Some(outcome) => Poll::Ready(outcome.clone()),
                None => Poll::Pending,
            },
        }
    }
}

// We never project pins into the promise; the outcome is cloned out on completion.
impl<T> Unpin for Promise<T> {}

impl<T: Value> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Inline(_) => f
                .debug_struct("Promise")
                .field("inline", &true)
                .finish_non_exhaustive(),
            Repr::Tracked(tracked) => f
                .debug_struct("Promise")
                .field("generation", &tracked.generation)
                .field("completion", tracked.completion())
                .finish_non_exhaustive(),
        }
    }
}

/// An owning reference to a pooled operation, plus the pool to schedule continuations on.
pub(crate) struct Tracked<T> {
    source: Lease<dyn Source<T>>,
    generation: u32,
    pool: PromisePool,
}

impl<T: Value> Tracked<T> {
    /// The completion of the operation, after confirming the state object still belongs to it.
    ///
    /// # Panics
    ///
    /// Panics if the state object was recycled while we held a logical reference to it.
    pub(crate) fn completion(&self) -> &Completion<T> {
        assert_eq!(
            self.source.generation(),
            self.generation,
            "state object was recycled under an owning reference - pool bookkeeping is corrupted"
        );

        self.source.completion()
    }

    pub(crate) fn pool(&self) -> &PromisePool {
        &self.pool
    }

    pub(crate) fn subscribe(&self, waiter: Waiter<T>) {
        self.completion().subscribe(waiter);
    }

    /// Drops our reference, first making sure a future rejection is not reported on our
    /// account.
    pub(crate) fn discard(self) {
        self.completion().suppress_unhandled_report();
    }
}

impl<T: Value> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            generation: self.generation,
            pool: self.pool.clone(),
        }
    }
}

/// What a combinator learned about one of its sources at construction time.
pub(crate) enum Snapshot<T> {
    Settled(Outcome<T>),
    Pending(Tracked<T>),
}

impl<T: Value> Snapshot<T> {
    pub(crate) fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }

    pub(crate) fn is_resolved(&self) -> bool {
        matches!(self, Self::Settled(Outcome::Resolved(_)))
    }

    /// The failure of an already-settled source, re-typed for the combinator.
    pub(crate) fn failure_as<U>(&self) -> Option<Outcome<U>> {
        match self {
            Self::Settled(outcome) => outcome.failure_as(),
            Self::Pending(_) => None,
        }
    }

    pub(crate) fn into_outcome(self) -> Option<Outcome<T>> {
        match self {
            Self::Settled(outcome) => Some(outcome),
            Self::Pending(tracked) => {
                tracked.discard();
                None
            }
        }
    }

    pub(crate) fn into_value(self) -> Option<T> {
        self.into_outcome().and_then(Outcome::into_resolved)
    }

    /// Gives up interest in the source. A pending source will not report its rejection.
    pub(crate) fn discard(self) {
        if let Self::Pending(tracked) = self {
            tracked.discard();
        }
    }
}

/// The plain state object shape behind [`PromisePool::deferred()`] and continuations.
pub(crate) struct Deferred<T> {
    completion: Completion<T>,
}

impl<T: Value> Shape for Deferred<T> {
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

/// The producer side of a deferred operation.
///
/// Settling consumes the resolver, so an operation can only be settled once. Dropping a
/// resolver without settling cancels the operation.
pub struct Resolver<T: Value> {
    slot: Option<Lease<Slot<Deferred<T>>>>,
    generation: u32,
}

impl<T: Value> Resolver<T> {
    pub(crate) fn new(slot: Lease<Slot<Deferred<T>>>) -> Self {
        let generation = slot.generation();

        Self {
            slot: Some(slot),
            generation,
        }
    }

    /// Settles the operation with a value.
    pub fn resolve(self, value: T) {
        self.settle(Outcome::Resolved(value));
    }

    /// Settles the operation with a failure.
    pub fn reject(self, rejection: Rejection) {
        self.settle(Outcome::Rejected(rejection));
    }

    /// Settles the operation as canceled.
    pub fn cancel(self) {
        self.settle(Outcome::Canceled);
    }

    fn settle(self, outcome: Outcome<T>) {
        assert!(
            self.try_settle(outcome),
            "resolver settled an operation that had already settled - pool bookkeeping is corrupted"
        );
    }

    /// Settles the operation unless something else (e.g. a cancellation token) got there
    /// first. Returns whether this call settled it.
    pub(crate) fn try_settle(mut self, outcome: Outcome<T>) -> bool {
        let Some(slot) = self.slot.take() else {
            return false;
        };

        Self::verify(&slot, self.generation);

        slot.completion().settle(outcome).is_ok()
    }

    fn verify(slot: &Slot<Deferred<T>>, generation: u32) {
        assert_eq!(
            slot.generation(),
            generation,
            "state object was recycled under its resolver - pool bookkeeping is corrupted"
        );
    }
}

impl<T: Value> Drop for Resolver<T> {
    fn drop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };

        Self::verify(&slot, self.generation);

        if slot.completion().settle(Outcome::Canceled).is_ok() {
            debug!("resolver dropped without settling; operation canceled");
        }
    }
}

impl<T: Value> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
