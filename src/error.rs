//! Error and Result types.

use std::fmt;

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A generic error representing all the ways [`Pool::acquire`][crate::Pool::acquire]
/// or [`PooledRef::release`][crate::PooledRef::release] can fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The pending-acquire queue was at its configured limit
    /// ([`PoolOptions::max_pending`][crate::PoolOptions::max_pending]) when `acquire()` was
    /// called, and no idle resource or permit was immediately available.
    #[error("pending-acquire limit of {limit} exceeded")]
    PendingLimitExceeded {
        /// The configured limit that was exceeded.
        limit: i64,
    },

    /// The pool was disposed, either before `acquire()` enqueued its `Borrower` or while it
    /// was still waiting.
    #[error("pool is shut down")]
    Shutdown,

    /// `acquire()` did not complete before [`PoolOptions::acquire_timeout`][crate::PoolOptions::acquire_timeout]
    /// elapsed.
    #[error("timed out waiting to acquire a resource")]
    Timeout,

    /// The user-provided allocator returned an error while attempting to create a new resource.
    #[error("allocator failed to produce a resource")]
    Allocate(#[source] BoxError),

    /// The user-provided release handler (reset pipeline) returned an error.
    ///
    /// The resource has already been destroyed by the time this is observed.
    #[error("release handler failed")]
    Release(#[source] BoxError),
}

impl Error {
    pub(crate) fn allocate(err: impl Into<BoxError>) -> Self {
        Error::Allocate(err.into())
    }

    pub(crate) fn release(err: impl Into<BoxError>) -> Self {
        Error::Release(err.into())
    }
}

/// A dynamically-typed error, as produced by user-supplied allocators and handlers.
pub type DynError = BoxError;

pub(crate) struct DisplayErr<'a>(pub &'a dyn std::error::Error);

impl fmt::Display for DisplayErr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.0, f)
    }
}
