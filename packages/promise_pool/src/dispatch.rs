use std::fmt;

/// A unit of work scheduled through a [`Dispatch`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The execution context that runs continuation callbacks.
///
/// The promise core decides *when* a callback may run (its source has settled) but not
/// *where*. Every continuation callback is handed to the pool's dispatcher as a [`Job`];
/// the dispatcher may run it immediately, queue it on a thread pool or hand it to an event
/// loop.
///
/// A dispatcher that drops a job without running it cancels the continuation's downstream
/// promise.
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use promise_pool::{Dispatch, Job, PromisePool};
///
/// #[derive(Debug)]
/// struct ThreadPerJob;
///
/// impl Dispatch for ThreadPerJob {
///     fn post(&self, job: Job) {
///         thread::spawn(job);
///     }
/// }
///
/// let pool = PromisePool::builder().dispatch(ThreadPerJob).build();
/// let (resolver, promise) = pool.deferred::<u32>();
/// let doubled = promise.on_resolve(|v| Ok(v * 2));
///
/// resolver.resolve(21);
/// assert_eq!(doubled.wait().into_resolved(), Some(42));
/// ```
pub trait Dispatch: Send + Sync + fmt::Debug {
    /// Schedules the job to run.
    fn post(&self, job: Job);
}

/// Runs every job immediately on the thread that settled the source.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct Inline;

impl Inline {
    /// Creates the inline dispatcher. This is the default dispatcher of a pool.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Dispatch for Inline {
    fn post(&self, job: Job) {
        job();
    }
}
