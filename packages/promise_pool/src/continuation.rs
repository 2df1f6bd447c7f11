//! Continuations: callbacks that run once a promise settles and settle a downstream promise
//! with their result.
//!
//! A continuation on a promise whose outcome is carried inline runs immediately on the calling
//! thread. Otherwise the callback is handed to the pool's [`Dispatch`][crate::Dispatch] once the
//! source settles, and the downstream promise is a pooled state object of its own.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::{
    CancellationToken, Completion, Handle, Outcome, Promise, Rejection, Repr, Value, Waiter,
};

impl<T: Value> Promise<T> {
    /// Transforms the value once the operation resolves.
    ///
    /// Rejections and cancellation pass through to the returned promise without invoking
    /// `callback`. Returning `Err` from the callback rejects the returned promise; so does a
    /// panic inside it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use promise_pool::{Outcome, PromisePool, Rejection};
    ///
    /// let pool = PromisePool::new();
    /// let (resolver, promise) = pool.deferred::<&str>();
    ///
    /// let parsed = promise.on_resolve(|text| text.parse::<u32>().map_err(Rejection::new));
    ///
    /// resolver.resolve("17");
    /// assert_eq!(parsed.wait(), Outcome::Resolved(17));
    /// ```
    #[must_use]
    pub fn on_resolve<U, F>(self, callback: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> Result<U, Rejection> + Send + 'static,
    {
        self.continue_with(None, move |outcome| match outcome {
            Outcome::Resolved(value) => callback(value).into(),
            Outcome::Rejected(rejection) => Outcome::Rejected(rejection),
            Outcome::Canceled => Outcome::Canceled,
        })
    }

    /// Recovers from a rejection.
    ///
    /// A resolved value or cancellation passes through without invoking `callback`.
    #[must_use]
    pub fn on_reject<F>(self, callback: F) -> Self
    where
        F: FnOnce(Rejection) -> Result<T, Rejection> + Send + 'static,
    {
        self.continue_with(None, move |outcome| match outcome {
            Outcome::Rejected(rejection) => callback(rejection).into(),
            other => other,
        })
    }

    /// Recovers from cancellation.
    ///
    /// A resolved value or rejection passes through without invoking `callback`.
    #[must_use]
    pub fn on_cancel<F>(self, callback: F) -> Self
    where
        F: FnOnce() -> Result<T, Rejection> + Send + 'static,
    {
        self.continue_with(None, move |outcome| match outcome {
            Outcome::Canceled => callback().into(),
            other => other,
        })
    }

    /// Maps whatever outcome the operation settles with to the outcome of the returned
    /// promise.
    ///
    /// If `token` is canceled before the callback starts, the callback never runs and the
    /// returned promise is canceled.
    ///
    /// # Example
    ///
    /// ```rust
    /// use promise_pool::{CancellationToken, Outcome, PromisePool};
    ///
    /// let pool = PromisePool::new();
    /// let token = CancellationToken::new();
    /// let (resolver, promise) = pool.deferred::<u32>();
    ///
    /// let described = promise.on_settle(
    ///     |outcome| Outcome::Resolved(format!("{outcome:?}")),
    ///     Some(&token),
    /// );
    ///
    /// token.cancel();
    /// resolver.resolve(1);
    ///
    /// assert_eq!(described.wait(), Outcome::Canceled);
    /// ```
    #[must_use]
    pub fn on_settle<U, F>(self, callback: F, token: Option<&CancellationToken>) -> Promise<U>
    where
        U: Value,
        F: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        self.continue_with(token, callback)
    }

    /// Runs `callback` once the operation settles, whatever the outcome, which then passes
    /// through to the returned promise unchanged.
    ///
    /// If the callback panics, the returned promise is rejected instead.
    #[must_use]
    pub fn finally<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.continue_with(None, move |outcome| {
            callback();
            outcome
        })
    }

    fn continue_with<U, F>(self, token: Option<&CancellationToken>, step: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(Outcome<T>) -> Outcome<U> + Send + 'static,
    {
        let tracked = match self.into_repr() {
            Repr::Inline(outcome) => {
                if token.is_some_and(CancellationToken::is_canceled) {
                    return Promise::canceled();
                }

                return Promise::from_outcome(run_step(step, outcome));
            }
            Repr::Tracked(tracked) => tracked,
        };

        let pool = tracked.pool().clone();
        let (resolver, downstream) = pool.deferred::<U>();
        let token = token.cloned();

        // The token only gets a non-owning handle, and only until the job below starts or is
        // abandoned, so a long-lived token does not accumulate finished continuations.
        let registration = token.as_ref().and_then(|token| {
            let handle = downstream.handle()?;
            token.on_cancel(move || cancel_downstream(&handle))
        });

        tracked.subscribe(Waiter::Resume(Box::new(move |source: &Completion<T>| {
            let outcome = source
                .outcome()
                .cloned()
                .expect("waiters are only notified after the outcome is published");

            // If the dispatcher drops the job without running it, the resolver inside cancels
            // the downstream operation.
            pool.dispatch(Box::new(move || {
                drop(registration);

                if token.as_ref().is_some_and(CancellationToken::is_canceled) {
                    resolver.try_settle(Outcome::Canceled);
                    return;
                }

                resolver.try_settle(run_step(step, outcome));
            }));
        })));

        downstream
    }
}

fn run_step<T, U>(step: impl FnOnce(Outcome<T>) -> Outcome<U>, outcome: Outcome<T>) -> Outcome<U> {
    match panic::catch_unwind(AssertUnwindSafe(|| step(outcome))) {
        Ok(next) => next,
        Err(payload) => {
            let rejection = Rejection::from_panic(&*payload);
            error!(%rejection, "continuation callback panicked; rejecting downstream promise");
            Outcome::Rejected(rejection)
        }
    }
}

fn cancel_downstream<U: Value>(handle: &Handle<U>) {
    if let Some(downstream) = handle.lease() {
        // Losing to the callback is fine; whoever settles first decides the outcome.
        if downstream.completion().settle(Outcome::Canceled).is_ok() {
            debug!("continuation canceled by its token before the callback ran");
        }
    }
}
