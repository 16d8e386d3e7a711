//! The configuration builder and the pluggable collaborator traits/closures.
//!
//! `Allocator` is an ergonomic trait with an `impl Future + Send + '_` method
//! so closures and stateful structs both work, backed by an object-safe
//! `DynAllocator` wrapper so `Pool<R>` can store any allocator behind one
//! type parameter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DynError;
use crate::metrics::{NoopMetrics, PoolMetricsRecorder};
use crate::pooled_ref::{ConnectionId, Metadata};
use crate::queue::QueueOrdering;
use crate::scheduler::AcquisitionScheduler;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Context passed to [`Allocator::allocate`] for a single allocation attempt.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct AllocateContext {
    /// The pool's `live` count including this in-flight allocation.
    pub pool_size: u32,
    /// The identity that will be assigned to the resource if allocation
    /// succeeds.
    pub connection_id: ConnectionId,
}

/// Produces one resource per invocation.
///
/// Implemented for closures with the signature
/// `Fn(AllocateContext) -> impl Future<Output = Result<R, DynError>> + Send`.
/// Implement it directly on a struct when the allocator needs to hold state
/// (a connection string, a round-robin server list).
///
/// There is no retry/backoff control flow built in: allocator errors are
/// propagated immediately to the failing borrower.
pub trait Allocator<R>: Send + Sync + 'static {
    /// Attempt to produce one resource.
    fn allocate(&self, cx: AllocateContext) -> impl Future<Output = Result<R, DynError>> + Send + '_;
}

impl<R, F, Fut> Allocator<R> for F
where
    F: Fn(AllocateContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, DynError>> + Send + 'static,
{
    fn allocate(&self, cx: AllocateContext) -> impl Future<Output = Result<R, DynError>> + Send + '_ {
        self(cx)
    }
}

/// Object-safe wrapper so `SharedPool<R>` can store any [`Allocator<R>`]
/// behind a single type parameter.
pub(crate) trait DynAllocator<R>: Send + Sync + 'static {
    fn allocate<'a>(&'a self, cx: AllocateContext) -> BoxFuture<'a, Result<R, DynError>>;
}

impl<R, T> DynAllocator<R> for T
where
    T: Allocator<R>,
{
    fn allocate<'a>(&'a self, cx: AllocateContext) -> BoxFuture<'a, Result<R, DynError>> {
        Box::pin(Allocator::allocate(self, cx))
    }
}

pub(crate) type ResetFn<R> =
    Arc<dyn for<'a> Fn(&'a mut R, Metadata) -> BoxFuture<'a, Result<(), DynError>> + Send + Sync>;
pub(crate) type DestroyFn<R> = Arc<dyn Fn(R) -> BoxFuture<'static, Result<(), DynError>> + Send + Sync>;
pub(crate) type HookFn<R> =
    Arc<dyn for<'a> Fn(&'a mut R, Metadata) -> BoxFuture<'a, Result<bool, DynError>> + Send + Sync>;
pub(crate) type EvictionFn<R> = Arc<dyn Fn(&R, Metadata) -> bool + Send + Sync>;

/// Immutable, validated pool configuration produced by [`PoolBuilder::build`].
pub struct PoolOptions<R> {
    pub(crate) ordering: QueueOrdering,
    pub(crate) thread_affinity: bool,
    pub(crate) max_size: i64,
    pub(crate) max_pending: i64,
    pub(crate) min_size: u32,
    pub(crate) initial_size: u32,
    pub(crate) acquire_timeout: Option<Duration>,
    pub(crate) max_lifetime: Option<Duration>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) test_before_acquire: bool,
    pub(crate) fair: bool,
    pub(crate) reset: Option<ResetFn<R>>,
    pub(crate) destroy: Option<DestroyFn<R>>,
    pub(crate) eviction: Option<EvictionFn<R>>,
    pub(crate) before_acquire: Option<HookFn<R>>,
    pub(crate) after_release: Option<HookFn<R>>,
    pub(crate) metrics: Arc<dyn PoolMetricsRecorder>,
    pub(crate) scheduler: AcquisitionScheduler,
}

// Not derived: `#[derive(Clone)]` would add a spurious `R: Clone` bound since
// the derive macro can't see that `R` only appears behind `Arc<dyn Fn(...)>`.
impl<R> Clone for PoolOptions<R> {
    fn clone(&self) -> Self {
        Self {
            ordering: self.ordering,
            thread_affinity: self.thread_affinity,
            max_size: self.max_size,
            max_pending: self.max_pending,
            min_size: self.min_size,
            initial_size: self.initial_size,
            acquire_timeout: self.acquire_timeout,
            max_lifetime: self.max_lifetime,
            idle_timeout: self.idle_timeout,
            test_before_acquire: self.test_before_acquire,
            fair: self.fair,
            reset: self.reset.clone(),
            destroy: self.destroy.clone(),
            eviction: self.eviction.clone(),
            before_acquire: self.before_acquire.clone(),
            after_release: self.after_release.clone(),
            metrics: self.metrics.clone(),
            scheduler: self.scheduler,
        }
    }
}

impl<R> Default for PoolOptions<R> {
    fn default() -> Self {
        Self {
            ordering: QueueOrdering::Fifo,
            thread_affinity: false,
            max_size: -1,
            max_pending: -1,
            min_size: 0,
            initial_size: 0,
            acquire_timeout: None,
            max_lifetime: None,
            idle_timeout: None,
            test_before_acquire: false,
            fair: true,
            reset: None,
            destroy: None,
            eviction: None,
            before_acquire: None,
            after_release: None,
            metrics: Arc::new(NoopMetrics),
            scheduler: AcquisitionScheduler::Immediate,
        }
    }
}

/// Accumulates validated settings for a [`crate::Pool`].
///
/// Defaults: allocation strategy unbounded, max pending unbounded, release
/// handler no-op, destroy handler no-op, eviction predicate never,
/// acquisition scheduler immediate, initial size 0, ordering FIFO,
/// thread-affinity off.
pub struct PoolBuilder<R> {
    pub(crate) allocator: Arc<dyn DynAllocator<R>>,
    pub(crate) options: PoolOptions<R>,
}

impl<R: Send + 'static> PoolBuilder<R> {
    pub(crate) fn new(allocator: impl Allocator<R>) -> Self {
        Self {
            allocator: Arc::new(allocator),
            options: PoolOptions::default(),
        }
    }

    /// Caps the number of live resources. Unset (the default) is unbounded.
    pub fn max_size(mut self, max: u32) -> Self {
        self.options.max_size = i64::from(max);
        self
    }

    /// Caps the pending-acquire queue.
    ///
    /// `0` makes `acquire()` fail fast whenever no idle slot or permit is
    /// immediately available, rather than waiting. Unset (the default) is
    /// unbounded.
    pub fn max_pending(mut self, max: u32) -> Self {
        self.options.max_pending = i64::from(max);
        self
    }

    /// Delivers pending borrowers in first-in-first-out order (the default).
    pub fn fifo(mut self) -> Self {
        self.options.ordering = QueueOrdering::Fifo;
        self
    }

    /// Delivers pending borrowers in last-in-first-out order.
    pub fn lifo(mut self) -> Self {
        self.options.ordering = QueueOrdering::Lifo;
        self
    }

    /// Enables the thread-affinity delivery variant: a freed slot is first
    /// offered to a borrower that subscribed on the same thread before
    /// falling back to a cross-thread match.
    #[cfg(feature = "affinity")]
    pub fn thread_affinity(mut self, enabled: bool) -> Self {
        self.options.thread_affinity = enabled;
        self
    }

    /// The number of resources to eagerly allocate when the pool is built.
    pub fn initial_size(mut self, n: u32) -> Self {
        self.options.initial_size = n;
        self
    }

    /// A floor the pool tries to maintain on a best-effort basis via a
    /// background task, without blocking `acquire()` or consuming a pending
    /// borrower's slot.
    pub fn min_size(mut self, n: u32) -> Self {
        self.options.min_size = n;
        self
    }

    /// Wraps `acquire()` with a timeout; expiry cancels the underlying
    /// subscription and returns [`crate::Error::Timeout`].
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.options.acquire_timeout = Some(timeout);
        self
    }

    /// A resource older than this is evicted the next time it is observed by
    /// the drain loop (on release or on acquire).
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.options.max_lifetime = Some(lifetime);
        self
    }

    /// A resource idle longer than this is evicted the next time it is
    /// observed by the drain loop.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = Some(timeout);
        self
    }

    /// Re-runs the eviction predicate as a liveness test before handing an
    /// idle slot to a borrower, in addition to the normal eviction checks.
    ///
    /// Defaults to `false`: unlike a database connection, an opaque `R` has
    /// no universal "ping"; the eviction predicate is the only test this
    /// crate can ask of it.
    pub fn test_before_acquire(mut self, enabled: bool) -> Self {
        self.options.test_before_acquire = enabled;
        self
    }

    /// When `true` (the default), a drive-by idle pop is held back while
    /// borrowers are already queued, so it cannot jump the line.
    pub fn fair(mut self, fair: bool) -> Self {
        self.options.fair = fair;
        self
    }

    /// The reset pipeline run before a released resource is considered for
    /// recycling. Defaults to a no-op.
    pub fn on_release<F>(mut self, reset: F) -> Self
    where
        F: for<'a> Fn(&'a mut R, Metadata) -> BoxFuture<'a, Result<(), DynError>> + Send + Sync + 'static,
    {
        self.options.reset = Some(Arc::new(reset));
        self
    }

    /// The teardown pipeline run on an evicted or invalidated resource.
    /// Errors are logged through the metrics recorder and otherwise
    /// swallowed. Defaults to a no-op.
    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(R) -> BoxFuture<'static, Result<(), DynError>> + Send + Sync + 'static,
    {
        self.options.destroy = Some(Arc::new(destroy));
        self
    }

    /// Decides whether a resource should be destroyed instead of recycled.
    /// Consulted on release and on acquire. Defaults to never evicting.
    pub fn evict_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R, Metadata) -> bool + Send + Sync + 'static,
    {
        self.options.eviction = Some(Arc::new(predicate));
        self
    }

    /// Optional hook run on an idle slot immediately before delivery, in
    /// addition to the eviction predicate.
    pub fn before_acquire<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut R, Metadata) -> BoxFuture<'a, Result<bool, DynError>> + Send + Sync + 'static,
    {
        self.options.before_acquire = Some(Arc::new(hook));
        self
    }

    /// Optional hook composed into the release pipeline, consulted only
    /// after the eviction predicate has already voted to keep the resource
    /// (no point running a hook on a resource that's being destroyed anyway).
    pub fn after_release<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut R, Metadata) -> BoxFuture<'a, Result<bool, DynError>> + Send + Sync + 'static,
    {
        self.options.after_release = Some(Arc::new(hook));
        self
    }

    /// Installs a metrics recorder. See [`crate::metrics::SimplePoolMetrics`]
    /// for a ready-made implementation.
    pub fn metrics_recorder(mut self, recorder: Arc<dyn PoolMetricsRecorder>) -> Self {
        self.options.metrics = recorder;
        self
    }

    /// Controls where a matched resource is handed to its borrower: inline
    /// on the draining thread (the default), or offloaded onto the runtime.
    /// See [`AcquisitionScheduler`].
    pub fn acquisition_scheduler(mut self, scheduler: AcquisitionScheduler) -> Self {
        self.options.scheduler = scheduler;
        self
    }

    /// Builds the pool, eagerly allocating `initial_size` resources.
    pub async fn build(self) -> Result<crate::Pool<R>, crate::Error> {
        crate::Pool::from_builder(self).await
    }

    /// Builds the pool without eagerly allocating anything, regardless of
    /// `initial_size`.
    pub fn build_lazy(self) -> crate::Pool<R> {
        crate::Pool::from_builder_lazy(self)
    }
}
