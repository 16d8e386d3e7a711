//! `Pool<R>` and the drain loop: the acquire/release state machine that
//! matches pending borrowers against idle slots and fresh allocations.
//!
//! The serialization strategy is a work-stealing WIP-CAS loop: at most one
//! thread ever runs [`SharedPool::drain_inner`] at a time, and every other
//! caller of [`SharedPool::drain`] just bumps a counter and returns.
//!
//! Every operation below that needs to hand an owned handle to a spawned
//! task takes `pool: &Arc<Self>` as a plain parameter rather than as `self`,
//! so callers clone explicitly (`Arc::clone(&self.0)`) instead of relying on
//! smart-pointer receiver sugar.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::allocation::{self, AllocationStrategy};
use crate::borrower::Borrower;
use crate::error::{DisplayErr, Error};
use crate::idle::IdleStore;
use crate::options::{AllocateContext, PoolBuilder, PoolOptions};
use crate::pending::Pending;
use crate::pooled_ref::{ConnectionId, Metadata, PooledRef, Slot};

pub(crate) struct SharedPool<R> {
    allocator: Arc<dyn crate::options::DynAllocator<R>>,
    options: PoolOptions<R>,
    strategy: Box<dyn AllocationStrategy>,
    idle: IdleStore<R>,
    pending: Pending<R>,
    wip: AtomicUsize,
    acquired: AtomicI64,
    inflight: AtomicI64,
}

/// A handle to a shared pool of resources of type `R`.
///
/// Cloning a `Pool` is cheap (an `Arc` bump) and every clone shares the same
/// underlying allocation budget, idle store, and pending queue.
pub struct Pool<R>(pub(crate) Arc<SharedPool<R>>);

impl<R> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Pool(Arc::clone(&self.0))
    }
}

impl<R> std::fmt::Debug for Pool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("size", &self.0.strategy.permit_granted())
            .field("num_idle", &self.0.idle.len())
            .field("num_pending", &self.0.pending.len())
            .field("is_disposed", &self.0.pending.is_terminated())
            .finish()
    }
}

impl<R: Send + 'static> Pool<R> {
    /// Starts building a pool around `allocator`.
    pub fn builder<A>(allocator: A) -> PoolBuilder<R>
    where
        A: crate::options::Allocator<R>,
    {
        PoolBuilder::new(allocator)
    }

    pub(crate) async fn from_builder(builder: PoolBuilder<R>) -> Result<Self, Error> {
        let pool = Self::build_shared(builder);
        let initial_size = pool.0.options.initial_size;

        for _ in 0..initial_size {
            let granted = pool.0.strategy.try_get_permits(1);
            if granted == 0 {
                break;
            }
            pool.0.inflight.fetch_add(1, Ordering::AcqRel);

            match SharedPool::allocate_one(&pool.0).await {
                Ok(slot) => {
                    pool.0.inflight.fetch_sub(1, Ordering::AcqRel);
                    pool.0.idle.push(slot);
                }
                Err(err) => {
                    pool.0.inflight.fetch_sub(1, Ordering::AcqRel);
                    pool.0.strategy.return_permits(1);
                    return Err(Error::allocate(err));
                }
            }
        }

        SharedPool::maintain_min_size(&pool.0);
        Ok(pool)
    }

    pub(crate) fn from_builder_lazy(builder: PoolBuilder<R>) -> Self {
        let pool = Self::build_shared(builder);
        SharedPool::maintain_min_size(&pool.0);
        pool
    }

    fn build_shared(builder: PoolBuilder<R>) -> Self {
        let PoolBuilder { allocator, options } = builder;

        let strategy: Box<dyn AllocationStrategy> = if options.max_size < 0 {
            Box::new(allocation::Unbounded::new())
        } else {
            Box::new(allocation::Bounded::new(options.max_size))
        };

        let idle = if options.max_size < 0 {
            IdleStore::unbounded()
        } else {
            IdleStore::bounded(options.max_size)
        };

        let pending = Pending::new(options.ordering, options.thread_affinity);

        Pool(Arc::new(SharedPool {
            allocator,
            options,
            strategy,
            idle,
            pending,
            wip: AtomicUsize::new(0),
            acquired: AtomicI64::new(0),
            inflight: AtomicI64::new(0),
        }))
    }

    /// Waits for a resource to become available, allocating a new one if
    /// the pool is under its size budget and none are idle. Fails fast if
    /// the pending queue is already at its configured limit or the pool has
    /// been disposed, and fails with a timeout if `acquire_timeout` elapses
    /// first.
    pub async fn acquire(&self) -> Result<PooledRef<R>, Error> {
        match self.0.options.acquire_timeout {
            Some(duration) => match tokio::time::timeout(duration, SharedPool::acquire(&self.0)).await {
                Ok(result) => result,
                Err(_elapsed) => Err(Error::Timeout),
            },
            None => SharedPool::acquire(&self.0).await,
        }
    }

    /// Returns an idle resource immediately, without waiting or triggering a
    /// new allocation. `None` if no idle resource is available right now.
    pub fn try_acquire(&self) -> Option<PooledRef<R>> {
        SharedPool::try_acquire(&self.0)
    }

    /// Shuts the pool down: fails every pending acquisition, destroys every
    /// idle resource, and rejects all acquisitions from this point on.
    ///
    /// Outstanding [`PooledRef`]s are unaffected; their `release`/`invalidate`
    /// still run (destroying unconditionally), since the back-link is a
    /// [`std::sync::Weak`] that doesn't keep the pool alive past this call.
    pub async fn dispose(&self) {
        SharedPool::dispose(&self.0).await;
    }

    /// Whether [`Self::dispose`] has been called.
    pub fn is_disposed(&self) -> bool {
        self.0.pending.is_terminated()
    }

    /// The current number of live resources (acquired + idle + in-flight
    /// allocations).
    pub fn size(&self) -> u32 {
        self.0.strategy.permit_granted().max(0) as u32
    }

    /// The number of resources currently sitting in the idle store.
    pub fn num_idle(&self) -> usize {
        self.0.idle.len()
    }
}

struct CancelGuard<R>(Arc<Borrower<R>>);

impl<R> Drop for CancelGuard<R> {
    fn drop(&mut self) {
        // A no-op if the borrower already reached a terminal state; this is
        // what makes cancellation of the `acquire()` future (e.g. a timeout
        // racing delivery) safe to fire unconditionally on drop.
        self.0.cancel();
    }
}

impl<R: Send + 'static> SharedPool<R> {
    async fn acquire(pool: &Arc<Self>) -> Result<PooledRef<R>, Error> {
        let limit = pool.options.max_pending;

        if limit == 0 {
            let idle_available = pool.idle.len() > 0;
            let permit_available = pool.strategy.estimate_permits() > 0;
            if !idle_available && !permit_available {
                return Err(Error::PendingLimitExceeded { limit });
            }
        } else if limit > 0 && pool.pending.len() as i64 >= limit {
            return Err(Error::PendingLimitExceeded { limit });
        }

        let seq = pool.pending.next_seq();
        let (borrower, delivery) = Borrower::new(seq);

        if pool.pending.push(Arc::clone(&borrower)).is_err() {
            return Err(Error::Shutdown);
        }

        let _cancel_guard = CancelGuard(Arc::clone(&borrower));
        SharedPool::drain(pool);

        match delivery.await {
            Ok(Ok(pooled_ref)) => Ok(pooled_ref),
            Ok(Err(err)) => Err(err),
            // The sender was dropped without sending, which only happens if
            // the pool is torn down mid-flight.
            Err(_recv_error) => Err(Error::Shutdown),
        }
    }

    fn try_acquire(pool: &Arc<Self>) -> Option<PooledRef<R>> {
        if pool.pending.is_terminated() {
            return None;
        }
        // With `fair` set, don't let a drive-by idle pop jump ahead of
        // borrowers already queued.
        if pool.options.fair && pool.pending.len() > 0 {
            return None;
        }

        loop {
            let mut slot = pool.idle.pop()?;
            if SharedPool::should_evict(pool, &slot) {
                pool.strategy.return_permits(1);
                SharedPool::spawn_destroy(pool, slot);
                continue;
            }

            if let Some(released_at) = slot.metadata.released_at {
                pool.options.metrics.idle_duration_on_recycle(released_at.elapsed());
            }
            slot.metadata.acquire_count += 1;

            pool.acquired.fetch_add(1, Ordering::AcqRel);
            return Some(PooledRef::new(slot, Arc::downgrade(pool)));
        }
    }

    async fn dispose(pool: &Arc<Self>) {
        for failed in pool.pending.terminate() {
            failed.fail(Error::Shutdown);
        }
        for slot in pool.idle.drain() {
            pool.strategy.return_permits(1);
            SharedPool::destroy(pool, slot).await;
        }
    }

    /// Triggers the drain loop. The first caller to observe `wip` go from 0
    /// to 1 becomes the owner and runs [`Self::drain_inner`] to completion;
    /// every other concurrent caller just increments the counter and
    /// returns, trusting the owner to notice and loop again.
    pub(crate) fn drain(pool: &Arc<Self>) {
        if pool.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }

        loop {
            SharedPool::drain_inner(pool);

            if pool.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
                break;
            }

            // Other threads requested more draining while we were working;
            // collapse however many requests arrived into a single extra
            // pass and keep going.
            pool.wip.store(1, Ordering::Release);
        }
    }

    /// One full pass matching pending borrowers against fresh allocations
    /// (case A) or freed idle slots (case B), repeated until neither can
    /// make progress.
    fn drain_inner(pool: &Arc<Self>) {
        loop {
            if pool.pending.is_terminated() {
                return;
            }

            let idle_count = pool.idle.len();
            let pend_count = pool.pending.len();

            if idle_count == 0
                && pend_count > 0
                && pool.strategy.permit_granted() < pool.strategy.permit_maximum()
            {
                let granted = pool.strategy.try_get_permits(1);
                if granted == 0 {
                    break;
                }

                let borrower = match pool.pending.poll() {
                    Some(b) => b,
                    None => {
                        pool.strategy.return_permits(granted);
                        continue;
                    }
                };

                if !borrower.is_pending() {
                    pool.strategy.return_permits(granted);
                    continue;
                }

                SharedPool::spawn_allocation(pool, borrower);
                continue;
            }

            if idle_count > 0 && pend_count > 0 {
                let slot = match pool.idle.pop() {
                    Some(s) => s,
                    None => continue,
                };

                let (borrower, fast_path) = match pool.pending.poll_for_delivery() {
                    Some(pair) => pair,
                    None => {
                        pool.idle.push(slot);
                        continue;
                    }
                };

                if !borrower.is_pending() {
                    pool.idle.push(slot);
                    continue;
                }

                SharedPool::case_b_deliver(pool, slot, borrower, fast_path);
                continue;
            }

            break;
        }
    }

    fn case_b_deliver(pool: &Arc<Self>, mut slot: Slot<R>, borrower: Arc<Borrower<R>>, fast_path: bool) {
        if SharedPool::should_evict(pool, &slot) {
            pool.pending.requeue(borrower);
            pool.strategy.return_permits(1);
            SharedPool::spawn_destroy(pool, slot);
            return;
        }

        if pool.options.before_acquire.is_some() || pool.options.test_before_acquire {
            let pool = Arc::clone(pool);
            tokio::spawn(async move {
                let metadata = slot.metadata;
                let mut evict = false;

                if let Some(hook) = pool.options.before_acquire.clone() {
                    match hook.as_ref()(&mut slot.resource, metadata).await {
                        Ok(true) => {}
                        Ok(false) | Err(_) => evict = true,
                    }
                }

                if !evict && pool.options.test_before_acquire {
                    if let Some(predicate) = &pool.options.eviction {
                        if predicate.as_ref()(&slot.resource, metadata) {
                            evict = true;
                        }
                    }
                }

                if evict {
                    pool.pending.requeue(borrower);
                    pool.strategy.return_permits(1);
                    SharedPool::spawn_destroy(&pool, slot);
                    SharedPool::drain(&pool);
                } else {
                    SharedPool::finish_case_b_delivery(&pool, slot, borrower, fast_path);
                }
            });
            return;
        }

        SharedPool::finish_case_b_delivery(pool, slot, borrower, fast_path);
    }

    fn finish_case_b_delivery(pool: &Arc<Self>, mut slot: Slot<R>, borrower: Arc<Borrower<R>>, fast_path: bool) {
        if pool.options.thread_affinity {
            if fast_path {
                pool.options.metrics.fast_path_delivered();
            } else {
                pool.options.metrics.slow_path_delivered();
            }
        }

        if let Some(released_at) = slot.metadata.released_at {
            pool.options.metrics.idle_duration_on_recycle(released_at.elapsed());
        }
        slot.metadata.acquire_count += 1;

        pool.acquired.fetch_add(1, Ordering::AcqRel);
        let pooled_ref = PooledRef::new(slot, Arc::downgrade(pool));
        SharedPool::dispatch_delivery(pool, borrower, pooled_ref);
    }

    /// Case A's async continuation: run the allocator, then either deliver
    /// to `borrower` or fail it and roll back the permit/inflight/acquired
    /// bookkeeping. `acquired`/`inflight` are bumped eagerly here, before the
    /// allocator runs, and rolled back only on error.
    fn spawn_allocation(pool: &Arc<Self>, borrower: Arc<Borrower<R>>) {
        pool.acquired.fetch_add(1, Ordering::AcqRel);
        pool.inflight.fetch_add(1, Ordering::AcqRel);

        let pool = Arc::clone(pool);
        tokio::spawn(async move {
            match SharedPool::allocate_one(&pool).await {
                Ok(slot) => {
                    pool.inflight.fetch_sub(1, Ordering::AcqRel);
                    let pooled_ref = PooledRef::new(slot, Arc::downgrade(&pool));
                    SharedPool::dispatch_delivery(&pool, borrower, pooled_ref);
                }
                Err(err) => {
                    pool.inflight.fetch_sub(1, Ordering::AcqRel);
                    pool.acquired.fetch_sub(1, Ordering::AcqRel);
                    pool.strategy.return_permits(1);
                    borrower.fail(Error::allocate(err));
                    SharedPool::drain(&pool);
                }
            }
        });
    }

    /// Runs the allocator once, recording its latency either way.
    async fn allocate_one(pool: &Arc<Self>) -> Result<Slot<R>, crate::error::DynError> {
        let connection_id = ConnectionId::next();
        let cx = AllocateContext {
            pool_size: pool.strategy.permit_granted().max(0) as u32,
            connection_id,
        };

        let start = Instant::now();
        match pool.allocator.allocate(cx).await {
            Ok(resource) => {
                pool.options.metrics.allocation_succeeded(start.elapsed());
                Ok(Slot {
                    resource,
                    metadata: Metadata::new(),
                })
            }
            Err(err) => {
                pool.options.metrics.allocation_failed(start.elapsed());
                Err(err)
            }
        }
    }

    fn dispatch_delivery(pool: &Arc<Self>, borrower: Arc<Borrower<R>>, pooled_ref: PooledRef<R>) {
        pool.options.scheduler.dispatch(borrower, pooled_ref, |lost| {
            // The borrower was cancelled between poll and delivery; treat
            // the hand-off as an immediate release to avoid leaking a
            // permit.
            tokio::spawn(async move {
                if let Err(err) = lost.release().await {
                    tracing::debug!(
                        error = %DisplayErr(&err),
                        "pool: release handler failed for an auto-released cancelled acquisition"
                    );
                }
            });
        });
    }

    /// Decrements `acquired`, runs the reset pipeline, and either returns the
    /// slot to the idle store or destroys it, depending on the eviction
    /// predicate, the `after_release` hook, and whether the reset pipeline
    /// itself errored.
    pub(crate) async fn release(pool: &Arc<Self>, mut slot: Slot<R>) -> Result<(), Error> {
        pool.acquired.fetch_sub(1, Ordering::AcqRel);
        let metadata = slot.metadata;

        let reset_result = if let Some(reset) = pool.options.reset.clone() {
            let start = Instant::now();
            let result = reset.as_ref()(&mut slot.resource, metadata).await;
            if result.is_ok() {
                pool.options.metrics.reset_succeeded(start.elapsed());
            }
            result
        } else {
            Ok(())
        };

        let outcome = match reset_result {
            Ok(()) => {
                let mut evict = SharedPool::should_evict(pool, &slot);

                if !evict {
                    if let Some(hook) = pool.options.after_release.clone() {
                        match hook.as_ref()(&mut slot.resource, metadata).await {
                            Ok(true) => {}
                            Ok(false) | Err(_) => evict = true,
                        }
                    }
                }

                if evict {
                    pool.strategy.return_permits(1);
                    SharedPool::spawn_destroy(pool, slot);
                } else {
                    slot.metadata.released_at = Some(Instant::now());
                    pool.options.metrics.recycled();
                    pool.idle.push(slot);
                }
                Ok(())
            }
            Err(err) => {
                // A reset-pipeline error is treated as eviction: the
                // resource is destroyed and the error forwarded to whoever
                // called `release()`.
                pool.strategy.return_permits(1);
                SharedPool::spawn_destroy(pool, slot);
                Err(Error::release(err))
            }
        };

        SharedPool::drain(pool);
        outcome
    }

    /// Unconditionally destroys the resource, bypassing the reset pipeline
    /// and eviction predicate entirely.
    pub(crate) async fn invalidate(pool: &Arc<Self>, slot: Slot<R>) {
        pool.acquired.fetch_sub(1, Ordering::AcqRel);
        pool.strategy.return_permits(1);
        SharedPool::destroy(pool, slot).await;
        SharedPool::maintain_min_size(pool);
        SharedPool::drain(pool);
    }

    /// Spawns [`Self::release`] for a `PooledRef` dropped without an
    /// explicit `release()`/`invalidate()` call.
    pub(crate) fn spawn_release(pool: &Arc<Self>, slot: Slot<R>) {
        let pool = Arc::clone(pool);
        tokio::spawn(async move {
            if let Err(err) = SharedPool::release(&pool, slot).await {
                tracing::warn!(
                    error = %DisplayErr(&err),
                    "pool: release handler failed for a dropped PooledRef"
                );
            }
        });
    }

    fn should_evict(pool: &Arc<Self>, slot: &Slot<R>) -> bool {
        if let Some(max_lifetime) = pool.options.max_lifetime {
            if slot.metadata.allocated_at.elapsed() >= max_lifetime {
                return true;
            }
        }

        if let Some(idle_timeout) = pool.options.idle_timeout {
            if let Some(released_at) = slot.metadata.released_at {
                if released_at.elapsed() >= idle_timeout {
                    return true;
                }
            }
        }

        if let Some(predicate) = &pool.options.eviction {
            return predicate.as_ref()(&slot.resource, slot.metadata);
        }

        false
    }

    /// Note: callers must `return_permits(1)` themselves before calling
    /// this, since destroying a resource always frees its permit, and the
    /// permit accounting differs by caller (e.g. `invalidate` also
    /// decrements `acquired`, done by its own caller).
    fn spawn_destroy(pool: &Arc<Self>, slot: Slot<R>) {
        let pool = Arc::clone(pool);
        tokio::spawn(async move {
            SharedPool::destroy(&pool, slot).await;
            SharedPool::maintain_min_size(&pool);
        });
    }

    async fn destroy(pool: &Arc<Self>, slot: Slot<R>) {
        let Slot { resource, metadata } = slot;
        pool.options.metrics.lifetime_on_destroy(metadata.allocated_at.elapsed());

        let start = Instant::now();
        let result = if let Some(destroy_fn) = pool.options.destroy.clone() {
            destroy_fn.as_ref()(resource).await
        } else {
            // No destroy handler configured: the resource is simply
            // dropped here, letting its own `Drop` impl (if any) run.
            Ok(())
        };
        pool.options.metrics.destroy_completed(start.elapsed());

        if let Err(err) = result {
            tracing::debug!(error = %DisplayErr(&*err), "pool: destroy handler returned an error");
        }
    }

    /// Best-effort background replenishment toward `PoolOptions::min_size`.
    /// Never blocks a caller and never consumes a pending borrower's permit
    /// request; skipped entirely when `min_size == 0`.
    fn maintain_min_size(pool: &Arc<Self>) {
        if pool.options.min_size == 0 {
            return;
        }

        loop {
            if pool.strategy.permit_granted() >= i64::from(pool.options.min_size) {
                break;
            }
            let granted = pool.strategy.try_get_permits(1);
            if granted == 0 {
                break;
            }

            pool.inflight.fetch_add(1, Ordering::AcqRel);
            let pool = Arc::clone(pool);
            tokio::spawn(async move {
                match SharedPool::allocate_one(&pool).await {
                    Ok(slot) => {
                        pool.inflight.fetch_sub(1, Ordering::AcqRel);
                        pool.idle.push(slot);
                        SharedPool::drain(&pool);
                    }
                    Err(err) => {
                        pool.inflight.fetch_sub(1, Ordering::AcqRel);
                        pool.strategy.return_permits(1);
                        tracing::warn!(
                            error = %DisplayErr(&*err),
                            "pool: min_size maintenance allocation failed"
                        );
                    }
                }
            });
        }
    }
}
