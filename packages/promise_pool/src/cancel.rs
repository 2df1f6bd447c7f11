use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use foldhash::fast::RandomState;
use parking_lot::Mutex;

type CancelCallback = Box<dyn FnOnce() + Send>;

/// Requests cancellation of continuations registered with it.
///
/// Pass a token to [`Promise::on_settle()`][crate::Promise::on_settle]. If the token is
/// canceled before the continuation's callback starts, the callback never runs and the
/// downstream promise settles as [`Outcome::Canceled`][crate::Outcome::Canceled].
///
/// A continuation only stays registered with the token until its callback starts (or is
/// abandoned), so one long-lived token can serve any number of continuations.
///
/// Clones share the same cancellation state.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    canceled: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

#[derive(Default)]
struct Callbacks {
    next_key: u64,
    entries: HashMap<u64, CancelCallback, RandomState>,
}

impl CancellationToken {
    /// Creates a token that is not canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token. Idempotent.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::AcqRel) {
            return;
        }

        let callbacks = mem::take(&mut self.inner.callbacks.lock().entries);

        for callback in callbacks.into_values() {
            callback();
        }
    }

    /// Whether [`cancel()`][Self::cancel] has been called on this token or any clone of it.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
    }

    /// Runs `callback` when the token is canceled, or immediately if it already is.
    ///
    /// The callback stays registered until it runs or the returned registration is dropped.
    /// Returns `None` if the callback already ran.
    pub(crate) fn on_cancel(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Option<CancelRegistration> {
        {
            let mut callbacks = self.inner.callbacks.lock();

            // Checked under the lock: `cancel()` sets the flag before taking the list, so
            // either we see the flag here or it sees our callback there.
            if !self.is_canceled() {
                let key = callbacks.next_key;
                callbacks.next_key = key.wrapping_add(1);
                callbacks.entries.insert(key, Box::new(callback));

                return Some(CancelRegistration {
                    token: Arc::downgrade(&self.inner),
                    key,
                });
            }
        }

        callback();
        None
    }

    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.inner.callbacks.lock().entries.len()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("canceled", &self.is_canceled())
            .finish_non_exhaustive()
    }
}

/// Keeps a callback registered with a token. Dropping it removes the callback if it has not
/// run yet.
///
/// Does not keep the token alive.
pub(crate) struct CancelRegistration {
    token: Weak<TokenInner>,
    key: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(token) = self.token.upgrade() {
            // The callback is dropped after the lock is released.
            let removed = token.callbacks.lock().entries.remove(&self.key);
            drop(removed);
        }
    }
}

impl fmt::Debug for CancelRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRegistration")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(CancellationToken: Send, Sync, Clone);

    #[test]
    fn callbacks_run_once_on_cancel() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let mut registrations = Vec::new();

        for _ in 0..3 {
            let count = Arc::clone(&count);
            registrations.push(token.on_cancel(move || {
                count.fetch_add(1, Ordering::Relaxed);
            }));
        }

        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(registrations.iter().all(Option::is_some));
        assert_eq!(token.registered(), 3);

        token.cancel();
        token.cancel();

        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert!(token.is_canceled());
    }

    #[test]
    fn late_callback_runs_immediately() {
        let token = CancellationToken::new();
        token.clone().cancel();

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let registration = token.on_cancel(move || {
            seen.fetch_add(1, Ordering::Relaxed);
        });

        assert!(registration.is_none());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dropped_registration_removes_callback() {
        let token = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let seen = Arc::clone(&count);
            let registration = token.on_cancel(move || {
                seen.fetch_add(1, Ordering::Relaxed);
            });

            assert!(registration.is_some());
            drop(registration);
        }

        assert_eq!(token.registered(), 0);

        token.cancel();
        assert_eq!(count.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn registration_outliving_token_is_harmless() {
        let token = CancellationToken::new();
        let registration = token.on_cancel(|| {});

        drop(token);
        drop(registration);
    }
}
