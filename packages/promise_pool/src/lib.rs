#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Pooled completion engine for asynchronous operations.
//!
//! A [`Promise`] stands for a result that will exist later. Behind every promise whose outcome
//! is not known up front sits a state object taken from a [`PromisePool`]. When the operation
//! ends and the last owning reference is gone, the state object is reset and returned to the
//! pool for an unrelated operation, so steady-state workloads do not allocate.
//!
//! # Quick start
//!
//! ```rust
//! use promise_pool::{Outcome, PromisePool};
//! # use futures::executor::block_on;
//!
//! let pool = PromisePool::new();
//!
//! let (resolver, promise) = pool.deferred::<u32>();
//! let doubled = promise.on_resolve(|value| Ok(value * 2));
//!
//! resolver.resolve(21);
//!
//! # block_on(async {
//! assert_eq!(doubled.await, Outcome::Resolved(42));
//! # });
//! ```
//!
//! # Combinators
//!
//! The pool combines many operations into one:
//!
//! * [`all()`][PromisePool::all] waits for every source and resolves with their values in
//!   input order. The first failure wins.
//! * [`merge()`][PromisePool::merge] does the same for a tuple of differently typed sources.
//! * [`race()`][PromisePool::race] adopts whatever outcome arrives first.
//! * [`first()`][PromisePool::first] adopts the first resolution, waiting out failures.
//!
//! When the combined outcome is already known at construction time, no state object is
//! allocated; the result is carried inline in the returned promise.
//!
//! # Outcomes
//!
//! An operation settles exactly once, into one of the three variants of [`Outcome`]:
//! resolved with a value, rejected with a [`Rejection`] or canceled. Continuation callbacks
//! that panic reject their downstream promise.
//!
//! # Unhandled rejections
//!
//! A rejection that nobody ever looked at is reported when its state object is recycled.
//! By default the report is a `tracing` error event; see
//! [`PromisePoolBuilder::on_unhandled_rejection()`] to route it elsewhere. Use
//! [`Promise::suppress_unhandled_report()`] to mark a rejection as deliberately ignored.
//!
//! # Handles
//!
//! [`Handle`] is a non-owning reference for diagnostics. It stays safe to use after the
//! operation has ended, reporting itself as stale instead of showing the state of whatever
//! operation now occupies the recycled state object.

mod builder;
mod cancel;
mod cells;
mod combinators;
mod completion;
mod continuation;
mod diagnostics;
mod dispatch;
mod error;
mod handle;
mod outcome;
mod pool;
mod promise;
mod recycler;
mod slot;
mod waiter;

pub use builder::*;
pub use cancel::*;
pub(crate) use cells::*;
pub use combinators::Merge;
pub(crate) use completion::*;
pub(crate) use diagnostics::*;
pub use dispatch::*;
pub use error::*;
pub use handle::*;
pub use outcome::*;
pub use pool::*;
pub(crate) use promise::{Deferred, Repr, Snapshot};
pub use promise::{Promise, Resolver};
pub(crate) use recycler::{Recycler, RecyclerConfig, Shelf};
pub use recycler::PoolStats;
pub(crate) use slot::*;
pub(crate) use waiter::*;

/// Implemented only by types of this crate, keeping public traits closed to outside impls.
trait Sealed {}
