use std::fmt;
use std::sync::Arc;

use crate::{
    Deferred, Dispatch, Job, Lease, Merge, PoolStats, Promise, PromisePoolBuilder, Recycler,
    RecyclerConfig, Resolver, Result, Shape, Slot, Value, combinators,
};

/// Creates and combines pooled asynchronous operations.
///
/// The pool owns the free lists that state objects return to when an operation ends, the
/// execution context for continuation callbacks and the sink for unhandled rejections.
/// Clones share all of these, as does every promise created through the pool.
///
/// # Example
///
/// ```rust
/// use promise_pool::{Outcome, Promise, PromisePool};
///
/// let pool = PromisePool::new();
///
/// let (first, a) = pool.deferred::<u32>();
/// let (second, b) = pool.deferred::<u32>();
///
/// let sum = pool
///     .all([a, b, Promise::resolved(100)])
///     .on_resolve(|values| Ok(values.iter().sum::<u32>()));
///
/// second.resolve(2);
/// first.resolve(1);
///
/// assert_eq!(sum.wait(), Outcome::Resolved(103));
/// ```
#[derive(Clone)]
pub struct PromisePool {
    recycler: Arc<Recycler>,
    dispatch: Arc<dyn Dispatch>,
}

impl PromisePool {
    /// Creates a pool with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a pool with custom settings.
    pub fn builder() -> PromisePoolBuilder {
        PromisePoolBuilder::new()
    }

    pub(crate) fn from_parts(config: RecyclerConfig, dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            recycler: Arc::new(Recycler::new(config)),
            dispatch,
        }
    }

    /// Creates an operation that is settled manually through the returned [`Resolver`].
    #[must_use]
    pub fn deferred<T: Value>(&self) -> (Resolver<T>, Promise<T>) {
        let lease = self.acquire::<Deferred<T>>();
        let promise = self.track(lease.clone());

        (Resolver::new(lease), promise)
    }

    /// Waits for every source to resolve, producing their values in input order.
    ///
    /// The first failure (rejection or cancellation) settles the result immediately; later
    /// outcomes are discarded and their rejections are not reported as unhandled.
    ///
    /// If the outcome is already known when this is called (no sources, every source
    /// resolved, or a source already failed) no state object is allocated.
    #[must_use]
    pub fn all<T: Value>(&self, sources: impl IntoIterator<Item = Promise<T>>) -> Promise<Vec<T>> {
        combinators::all(self, sources)
    }

    /// Settles with the outcome of whichever source settles first, whatever that outcome is.
    ///
    /// Rejections of the losing sources are not reported as unhandled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSources`][crate::Error::NoSources] if `sources` is empty, as such
    /// a race could never settle.
    pub fn race<T: Value>(
        &self,
        sources: impl IntoIterator<Item = Promise<T>>,
    ) -> Result<Promise<T>> {
        combinators::race(self, sources)
    }

    /// Resolves with the value of whichever source resolves first.
    ///
    /// Failures are waited out. If no source resolves, the result takes on the outcome of the
    /// last source in input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSources`][crate::Error::NoSources] if `sources` is empty.
    pub fn first<T: Value>(
        &self,
        sources: impl IntoIterator<Item = Promise<T>>,
    ) -> Result<Promise<T>> {
        combinators::first(self, sources)
    }

    /// Joins a tuple of 2 to 8 promises of possibly different types into a promise of a
    /// tuple of their values.
    ///
    /// Follows the same rules as [`all()`][Self::all].
    ///
    /// # Example
    ///
    /// ```rust
    /// use promise_pool::{Outcome, PromisePool};
    ///
    /// let pool = PromisePool::new();
    /// let (name, name_promise) = pool.deferred::<String>();
    /// let (age, age_promise) = pool.deferred::<u8>();
    ///
    /// let person = pool.merge((name_promise, age_promise));
    ///
    /// age.resolve(42);
    /// name.resolve("Ferris".to_string());
    ///
    /// assert_eq!(person.wait(), Outcome::Resolved(("Ferris".to_string(), 42)));
    /// ```
    #[must_use]
    pub fn merge<M: Merge>(&self, sources: M) -> Promise<M::Output> {
        sources.merge_into(self)
    }

    /// Allocation and reuse counters across every shape of state object.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.recycler.stats()
    }

    pub(crate) fn acquire<S: Shape>(&self) -> Lease<Slot<S>> {
        self.recycler.acquire::<S>()
    }

    /// Wraps a freshly acquired state object in a promise of its output.
    pub(crate) fn track<S: Shape>(&self, lease: Lease<Slot<S>>) -> Promise<S::Output> {
        Promise::tracked(lease.into_source(), self.clone())
    }

    pub(crate) fn dispatch(&self, job: Job) {
        self.dispatch.post(job);
    }
}

impl Default for PromisePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PromisePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromisePool")
            .field("recycler", &self.recycler)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}
