use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::{Completion, Lease, Pooled, Value};

/// Something that wants to hear, exactly once, that a completion has settled.
///
/// Waiters are consumed by notification, so a waiter cannot fire twice even if the same
/// completion were (erroneously) revisited.
pub(crate) enum Waiter<T> {
    /// Resumes a continuation. The callback is handed the settled completion so it can read
    /// the outcome and flag the source as needed.
    Resume(Box<dyn FnOnce(&Completion<T>) + Send>),

    /// Feeds one source's outcome into a combinator.
    Aggregate(Passthrough<T>),

    /// Releases a thread parked in a blocking wait.
    Wake(Arc<Signal>),
}

impl<T: Value> Waiter<T> {
    pub(crate) fn notify(self, source: &Completion<T>) {
        match self {
            Self::Resume(callback) => callback(source),
            Self::Aggregate(passthrough) => passthrough.deliver(source),
            Self::Wake(signal) => signal.raise(),
        }
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resume(_) => f.write_str("Resume"),
            Self::Aggregate(passthrough) => f
                .debug_tuple("Aggregate")
                .field(&passthrough.index)
                .finish(),
            Self::Wake(_) => f.write_str("Wake"),
        }
    }
}

/// A combinator state object that aggregates the outcomes of indexed sources.
pub(crate) trait Sink<T>: Pooled {
    /// Accepts the outcome of the source at `index`. Called exactly once per registered source.
    fn accept(&self, index: usize, source: &Completion<T>);
}

/// Binds one source to its destination in a combinator.
///
/// Holds a logical reference to the combinator, keeping it from being recycled until every
/// source it listens to has reported in.
pub(crate) struct Passthrough<T> {
    sink: Lease<dyn Sink<T>>,
    index: usize,
}

impl<T> Passthrough<T> {
    pub(crate) fn new(sink: Lease<dyn Sink<T>>, index: usize) -> Self {
        Self { sink, index }
    }

    fn deliver(self, source: &Completion<T>) {
        self.sink.accept(self.index, source);

        // Our retention of the combinator is released here, after the delivery.
    }
}

/// One-shot flag a blocked thread can park on.
#[derive(Debug, Default)]
pub(crate) struct Signal {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn raise(&self) {
        *self.raised.lock() = true;
        self.condvar.notify_all();
    }

    /// Parks until raised or until the deadline passes. Returns whether the signal was raised.
    pub(crate) fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut raised = self.raised.lock();

        while !*raised {
            match deadline {
                Some(deadline) => {
                    if self.condvar.wait_until(&mut raised, deadline).timed_out() {
                        return *raised;
                    }
                }
                None => self.condvar.wait(&mut raised),
            }
        }

        true
    }
}
