//! The handle returned to a successful `acquire()`.
//!
//! Offers `Deref`/`DerefMut` access to the underlying resource and releases
//! it automatically on `Drop`. Each physical resource also carries a
//! [`ConnectionId`] that survives recycling, so callers and tests can assert
//! "same resource" by comparing IDs rather than resource values.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::inner::SharedPool;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Uniquely identifies one physical resource for its entire lifetime,
/// independent of how many times it is recycled between borrowers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time bookkeeping about a resource, exposed to the eviction
/// predicate, the optional hooks, and the caller via [`PooledRef::metadata`].
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    /// Stable identity of the underlying resource, preserved across recycles.
    pub connection_id: ConnectionId,
    /// Number of times this resource has been handed to a borrower,
    /// including the current hand-off.
    pub acquire_count: u64,
    /// When the resource was first allocated.
    pub allocated_at: Instant,
    /// When the resource was last released to the idle store, if ever.
    pub released_at: Option<Instant>,
}

impl Metadata {
    pub(crate) fn new() -> Self {
        Self {
            connection_id: ConnectionId::next(),
            acquire_count: 1,
            allocated_at: Instant::now(),
            released_at: None,
        }
    }

    /// Time since this resource was first allocated.
    pub fn life_time(&self) -> Duration {
        self.allocated_at.elapsed()
    }

    /// Time since this resource was last released, if it has ever been idle.
    pub fn idle_time(&self) -> Option<Duration> {
        self.released_at.map(|t| t.elapsed())
    }
}

/// The resource plus its bookkeeping, as it travels between the idle store
/// and a borrower's [`PooledRef`].
pub(crate) struct Slot<R> {
    pub(crate) resource: R,
    pub(crate) metadata: Metadata,
}

/// A handle granting exclusive use of a resource until [`release`][Self::release]
/// or [`invalidate`][Self::invalidate] is called.
///
/// Dropping a `PooledRef` without calling either is equivalent to calling
/// `release()`: the resource is returned to the pool on a spawned task.
///
/// The back-link to the owning pool is a [`Weak`] reference: a `PooledRef`
/// does not keep the pool alive past its logical lifetime. If the pool has
/// already been dropped, `release`/`invalidate`/the `Drop` fallback simply
/// drop the resource in place.
pub struct PooledRef<R> {
    slot: Option<Slot<R>>,
    pool: Weak<SharedPool<R>>,
}

impl<R: Send + 'static> PooledRef<R> {
    pub(crate) fn new(slot: Slot<R>, pool: Weak<SharedPool<R>>) -> Self {
        Self {
            slot: Some(slot),
            pool,
        }
    }

    /// Borrows the underlying resource.
    ///
    /// # Panics
    /// Panics if called after `release()`/`invalidate()` have taken the
    /// resource — unreachable through the public API since both consume
    /// `self`.
    pub fn get(&self) -> &R {
        &self.slot.as_ref().expect("PooledRef used after release").resource
    }

    /// Mutably borrows the underlying resource.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.slot.as_mut().expect("PooledRef used after release").resource
    }

    /// Snapshot of this hand-off's bookkeeping.
    pub fn metadata(&self) -> Metadata {
        self.slot.as_ref().expect("PooledRef used after release").metadata
    }

    /// Runs the resource through the reset pipeline and, unless the eviction
    /// predicate (or `after_release` hook) says otherwise, returns it to the
    /// idle store.
    ///
    /// An error here means the reset pipeline failed: the resource has
    /// already been destroyed by the time the error is observed.
    pub async fn release(mut self) -> Result<(), Error> {
        if let Some(slot) = self.slot.take() {
            if let Some(pool) = self.pool.upgrade() {
                return SharedPool::release(&pool, slot).await;
            }
        }
        Ok(())
    }

    /// Unconditionally destroys the resource, bypassing the reset pipeline
    /// and eviction predicate.
    pub async fn invalidate(mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(pool) = self.pool.upgrade() {
                SharedPool::invalidate(&pool, slot).await;
            }
        }
    }
}

impl<R> std::ops::Deref for PooledRef<R> {
    type Target = R;

    fn deref(&self) -> &R {
        self.get()
    }
}

impl<R> std::ops::DerefMut for PooledRef<R> {
    fn deref_mut(&mut self) -> &mut R {
        self.get_mut()
    }
}

impl<R> fmt::Debug for PooledRef<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledRef")
            .field("metadata", &self.slot.as_ref().map(|s| s.metadata))
            .finish()
    }
}

impl<R: Send + 'static> Drop for PooledRef<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Some(pool) = self.pool.upgrade() {
                SharedPool::spawn_release(&pool, slot);
            }
        }
    }
}
