use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::{Error, Lease, Outcome, Pooled, Promise, PromisePool, Result, Source, Value};

/// A non-owning reference to a pooled operation, for diagnostics.
///
/// A handle does not keep the operation alive. Once every owning reference ([`Promise`],
/// resolver, continuation, combinator) is gone, the state object behind it is recycled for an
/// unrelated operation and the handle becomes stale. Stale handles fail closed: they never
/// report state belonging to another operation.
///
/// Equality and hashing consider the identity of the state object plus the generation of
/// the operation that occupied it, so handles to successive operations on the same recycled
/// state object are distinct.
///
/// # Example
///
/// ```rust
/// use promise_pool::PromisePool;
///
/// let pool = PromisePool::new();
/// let (resolver, promise) = pool.deferred::<u32>();
/// let handle = promise.handle().unwrap();
///
/// assert!(handle.is_valid());
/// assert_eq!(handle.state().unwrap(), None);
///
/// resolver.resolve(5);
/// drop(promise);
///
/// // Nobody owns the operation any more, so its state object was recycled.
/// assert!(!handle.is_valid());
/// assert!(handle.state().is_err());
/// ```
pub struct Handle<T> {
    target: Arc<dyn Source<T>>,
    generation: u32,
    pool: PromisePool,
}

impl<T: Value> Handle<T> {
    pub(crate) fn new(target: Arc<dyn Source<T>>, generation: u32, pool: PromisePool) -> Self {
        Self {
            target,
            generation,
            pool,
        }
    }

    /// The generation of the operation this handle was created for.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether the operation this handle was created for still occupies the state object.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lease().is_some()
    }

    /// The outcome if the operation has settled, `None` if it is still pending.
    ///
    /// This is a diagnostic look: seeing a rejection here does not count as handling it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleHandle`] if the operation has ended and its state object has
    /// been recycled.
    pub fn state(&self) -> Result<Option<Outcome<T>>> {
        let lease = self.lease().ok_or(Error::StaleHandle {
            handle_generation: self.generation,
        })?;

        Ok(lease.completion().outcome().cloned())
    }

    /// An owning promise for the operation, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Promise<T>> {
        self.lease()
            .map(|lease| Promise::tracked(lease, self.pool.clone()))
    }

    /// Takes a logical reference, but only if the state object still belongs to our
    /// operation. Payload reads happen only under such a reference.
    pub(crate) fn lease(&self) -> Option<Lease<dyn Source<T>>> {
        if self.target.generation() != self.generation {
            return None;
        }

        if !self.target.try_retain() {
            return None;
        }

        // SAFETY: `try_retain()` just counted a logical reference for us.
        let lease = unsafe { Lease::adopt(Arc::clone(&self.target)) };

        // The slot may have been recycled and reissued between the generation check and the
        // retain. Dropping the lease in that case just gives the reference back.
        (lease.generation() == self.generation).then_some(lease)
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.target).cast::<()>().addr()
    }
}

impl<T: Value> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            generation: self.generation,
            pool: self.pool.clone(),
        }
    }
}

impl<T: Value> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address() && self.generation == other.generation
    }
}

impl<T: Value> Eq for Handle<T> {}

impl<T: Value> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
        self.generation.hash(state);
    }
}

impl<T: Value> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("generation", &self.generation)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
