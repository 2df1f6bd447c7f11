use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{
    Diagnostics, Dispatch, Inline, PromisePool, RecyclerConfig, Rejection, RejectionHandler,
};

/// Builder for creating an instance of [`PromisePool`].
///
/// Every setting is optional; `PromisePool::builder().build()` is equivalent to
/// [`PromisePool::new()`].
///
/// # Example
///
/// ```
/// use promise_pool::{Inline, PromisePool};
///
/// let pool = PromisePool::builder()
///     .idle_limit(64)
///     .dispatch(Inline::new())
///     .on_unhandled_rejection(|rejection| eprintln!("unhandled: {rejection}"))
///     .build();
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[must_use]
pub struct PromisePoolBuilder {
    idle_limit: Option<usize>,
    dispatch: Option<Arc<dyn Dispatch>>,
    on_unhandled_rejection: Option<RejectionHandler>,

    _not_sync: PhantomData<Cell<()>>,
}

impl PromisePoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            idle_limit: None,
            dispatch: None,
            on_unhandled_rejection: None,
            _not_sync: PhantomData,
        }
    }

    /// Sets how many idle state objects of each shape the pool retains for reuse.
    ///
    /// State objects released beyond this limit are freed. Zero disables reuse.
    /// Defaults to 1024.
    pub fn idle_limit(mut self, limit: usize) -> Self {
        self.idle_limit = Some(limit);
        self
    }

    /// Sets the execution context that runs continuation callbacks.
    ///
    /// Defaults to [`Inline`], which runs a callback on whichever thread settled its source.
    pub fn dispatch(mut self, dispatch: impl Dispatch + 'static) -> Self {
        self.dispatch = Some(Arc::new(dispatch));
        self
    }

    /// Sets the handler that receives rejections nobody observed.
    ///
    /// A rejection is reported once, when its state object is recycled without anyone having
    /// looked at the outcome or suppressed the report. Without a handler, reports are emitted
    /// as `tracing` error events.
    pub fn on_unhandled_rejection(
        mut self,
        handler: impl Fn(&Rejection) + Send + Sync + 'static,
    ) -> Self {
        self.on_unhandled_rejection = Some(Arc::new(handler));
        self
    }

    /// Builds the pool with the specified configuration.
    #[must_use]
    pub fn build(self) -> PromisePool {
        let mut config = RecyclerConfig::default();

        if let Some(limit) = self.idle_limit {
            config.idle_limit = limit;
        }

        if let Some(handler) = self.on_unhandled_rejection {
            config.diagnostics = Diagnostics::with_handler(handler);
        }

        let dispatch = self.dispatch.unwrap_or_else(|| Arc::new(Inline::new()));

        PromisePool::from_parts(config, dispatch)
    }
}

impl fmt::Debug for PromisePoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromisePoolBuilder")
            .field("idle_limit", &self.idle_limit)
            .field("dispatch", &self.dispatch)
            .field(
                "on_unhandled_rejection",
                &self.on_unhandled_rejection.is_some(),
            )
            .finish_non_exhaustive()
    }
}
