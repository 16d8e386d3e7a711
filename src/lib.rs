//! A generic, non-blocking asynchronous resource pool.
//!
//! `respool` manages a budget of interchangeable resources of type `R` —
//! database connections, RPC channels, worker handles, anything expensive to
//! create and safe to reuse — behind a single [`Pool<R>`] handle. Acquiring a
//! resource never blocks a thread: every waiter is served by a lock-free
//! drain loop that matches freed resources and allocation permits to pending
//! [`acquire()`][Pool::acquire] calls as they become available.
//!
//! ```no_run
//! use respool::Pool;
//!
//! # async fn example() -> Result<(), respool::Error> {
//! let pool = Pool::builder(|_cx| async { Ok::<_, respool::DynError>(42_i32) })
//!     .max_size(10)
//!     .build()
//!     .await?;
//!
//! let resource = pool.acquire().await?;
//! assert_eq!(*resource, 42);
//! resource.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! See [`PoolBuilder`] for the full set of configuration knobs, and
//! [`metrics`] for pool-health instrumentation.

mod allocation;
mod borrower;
mod error;
mod idle;
mod inner;
pub mod metrics;
mod options;
mod pending;
mod pooled_ref;
mod queue;
mod scheduler;

pub use allocation::{AllocationStrategy, Bounded, Unbounded};
pub use error::{DynError, Error, Result};
pub use inner::Pool;
pub use options::{AllocateContext, Allocator, PoolBuilder, PoolOptions};
pub use pooled_ref::{ConnectionId, Metadata, PooledRef};
pub use queue::QueueOrdering;
pub use scheduler::AcquisitionScheduler;
