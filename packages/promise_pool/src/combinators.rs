//! Combinators aggregating many operations into one.
//!
//! Every combinator follows the same assembly:
//!
//! 1. Snapshot each source. Inline sources and sources that have already settled have their
//!    outcome available right away.
//! 2. If the combined outcome is already decided, return it inline without allocating.
//! 3. Otherwise acquire a combinator state object from the pool, seed its pending count with
//!    a construction guard, register a passthrough on each source that is still pending and
//!    finally drop the guard. The guard keeps a source that settles during assembly from
//!    completing the aggregate before every source has been registered.
//!
//! From then on, every transition is driven by source notifications.

mod all;
mod first;
mod merge;
mod race;

pub(crate) use all::*;
pub(crate) use first::*;
pub use merge::*;
pub(crate) use race::*;
