use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Types that can be carried as the value of a promise.
///
/// A settled value may be observed by any number of waiters on any thread, each of which
/// receives its own clone, so values must be cloneable and shareable across threads.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}

/// The terminal state of an asynchronous operation.
///
/// Once an operation leaves the pending state it settles into exactly one of these and never
/// changes again.
#[derive(Clone, Debug, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "an operation has exactly these three fates - adding one would change every consumer"
)]
pub enum Outcome<T> {
    /// The operation produced a value.
    Resolved(T),

    /// The operation failed with the given reason.
    Rejected(Rejection),

    /// The operation was canceled before it could produce a value.
    Canceled,
}

impl<T> Outcome<T> {
    /// Whether the operation produced a value.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Whether the operation failed with a rejection.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Whether the operation was canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns the value if the operation was resolved.
    #[must_use]
    pub fn into_resolved(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Rejected(_) | Self::Canceled => None,
        }
    }

    /// Returns the rejection reason if the operation was rejected.
    #[must_use]
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            Self::Resolved(_) | Self::Canceled => None,
        }
    }

    /// Transforms the resolved value, passing failures through unchanged.
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Resolved(value) => Outcome::Resolved(f(value)),
            Self::Rejected(rejection) => Outcome::Rejected(rejection),
            Self::Canceled => Outcome::Canceled,
        }
    }

    /// Re-types a failure so it can be adopted by a downstream operation of another type.
    ///
    /// Returns `None` for a resolved outcome.
    pub(crate) fn failure_as<U>(&self) -> Option<Outcome<U>> {
        match self {
            Self::Resolved(_) => None,
            Self::Rejected(rejection) => Some(Outcome::Rejected(rejection.clone())),
            Self::Canceled => Some(Outcome::Canceled),
        }
    }
}

impl<T> From<Result<T, Rejection>> for Outcome<T> {
    fn from(result: Result<T, Rejection>) -> Self {
        match result {
            Ok(value) => Self::Resolved(value),
            Err(rejection) => Self::Rejected(rejection),
        }
    }
}

/// The reason an operation was rejected.
///
/// Cheap to clone; every waiter observing the same rejection shares one underlying error.
/// Two rejections compare equal only if they share that underlying error.
#[derive(Clone)]
pub struct Rejection {
    reason: Arc<dyn StdError + Send + Sync + 'static>,
}

impl Rejection {
    /// Creates a rejection from an error value.
    #[must_use]
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            reason: Arc::new(error),
        }
    }

    /// Creates a rejection carrying only a human-readable message.
    #[must_use]
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(Message(message.to_string()))
    }

    /// Creates a rejection from the payload of a caught panic.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self::new(Panicked(message))
    }

    /// The underlying error.
    #[must_use]
    pub fn reason(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.reason
    }

    /// Attempts to view the underlying error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.reason.downcast_ref::<E>()
    }
}

impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rejection").field(&self.reason).finish()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reason, f)
    }
}

impl PartialEq for Rejection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.reason, &other.reason)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

#[derive(Debug, Error)]
#[error("callback panicked: {0}")]
struct Panicked(String);

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Rejection: Send, Sync, Clone);
    assert_impl_all!(Outcome<String>: Send, Sync, Clone);

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskOnFire;

    #[test]
    fn message_rejection_displays_message() {
        let rejection = Rejection::msg("no route to host");
        assert_eq!(rejection.to_string(), "no route to host");
    }

    #[test]
    fn typed_rejection_downcasts() {
        let rejection = Rejection::new(DiskOnFire);

        assert!(rejection.downcast_ref::<DiskOnFire>().is_some());
        assert_eq!(rejection.reason().to_string(), "disk on fire");
    }

    #[test]
    fn clones_share_identity() {
        let rejection = Rejection::msg("x");
        let clone = rejection.clone();
        let other = Rejection::msg("x");

        assert_eq!(rejection, clone);
        assert_ne!(rejection, other);
    }

    #[test]
    fn panic_payload_becomes_message() {
        let payload: Box<dyn Any + Send> = Box::new("kaboom");
        let rejection = Rejection::from_panic(&*payload);

        assert_eq!(rejection.to_string(), "callback panicked: kaboom");

        let payload: Box<dyn Any + Send> = Box::new(17_u8);
        let rejection = Rejection::from_panic(&*payload);

        assert_eq!(
            rejection.to_string(),
            "callback panicked: unknown panic payload"
        );
    }

    #[test]
    fn failure_as_retypes_failures_only() {
        let resolved: Outcome<u8> = Outcome::Resolved(1);
        assert!(resolved.failure_as::<String>().is_none());

        let canceled: Outcome<u8> = Outcome::Canceled;
        assert_eq!(canceled.failure_as::<String>(), Some(Outcome::Canceled));

        let rejection = Rejection::msg("nope");
        let rejected: Outcome<u8> = Outcome::Rejected(rejection.clone());
        assert_eq!(
            rejected.failure_as::<String>(),
            Some(Outcome::Rejected(rejection))
        );
    }

    #[test]
    fn map_and_from_result() {
        let outcome: Outcome<u32> = Ok::<_, Rejection>(20).into();
        assert_eq!(outcome.map(|v| v * 2), Outcome::Resolved(40));

        let outcome: Outcome<u32> = Err(Rejection::msg("bad")).into();
        assert!(outcome.is_rejected());
        assert!(outcome.clone().into_resolved().is_none());
        assert_eq!(outcome.rejection().map(ToString::to_string).as_deref(), Some("bad"));
    }
}
