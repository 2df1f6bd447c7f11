use thiserror::Error;

/// Errors reported synchronously to the caller of a promise operation.
///
/// These describe misuse at the call site. Failures of the asynchronous operation itself
/// are never reported through this type - they settle the operation as
/// [`Outcome::Rejected`][crate::Outcome::Rejected] or [`Outcome::Canceled`][crate::Outcome::Canceled].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A combinator that needs at least one source was given none.
    #[error("{combinator} requires at least one source promise")]
    NoSources {
        /// The name of the combinator that was called.
        combinator: &'static str,
    },

    /// The handle refers to an operation whose state object has since been recycled for
    /// an unrelated operation.
    #[error("handle refers to a recycled operation (handle generation {handle_generation})")]
    StaleHandle {
        /// The generation recorded in the handle when it was created.
        handle_generation: u32,
    },
}

/// A specialized `Result` type for promise operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
