//! Integration tests against the public `Pool<R>` API: the invariants,
//! round-trip properties, and acquire/release/invalidate scenarios.
//!
//! Run against `#[tokio::test]` since this crate's resource type is an
//! opaque, in-process value rather than a database connection — a `u64`
//! counter stands in for `R`, letting assertions compare identity via
//! `ConnectionId` instead of resource contents.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use respool::{DynError, Error, Pool};

fn counting_allocator() -> (Arc<AtomicU64>, impl Fn(respool::AllocateContext) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, DynError>> + Send>> + Send + Sync + 'static)
{
    let counter = Arc::new(AtomicU64::new(0));
    let for_closure = Arc::clone(&counter);
    let allocator = move |_cx: respool::AllocateContext| {
        let counter = Arc::clone(&for_closure);
        Box::pin(async move { Ok::<_, DynError>(counter.fetch_add(1, Ordering::SeqCst)) })
            as std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, DynError>> + Send>>
    };
    (counter, allocator)
}

#[tokio::test]
async fn release_then_acquire_recycles_the_same_resource() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator).max_size(1).build_lazy();

    let first = pool.acquire().await.unwrap();
    let first_id = first.metadata().connection_id;
    first.release().await.unwrap();

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.metadata().connection_id, first_id, "release -> acquire must be identity-preserving");
}

#[tokio::test]
async fn invalidate_then_acquire_gets_a_fresh_resource() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator).max_size(1).build_lazy();

    let first = pool.acquire().await.unwrap();
    let first_id = first.metadata().connection_id;
    first.invalidate().await;

    let second = pool.acquire().await.unwrap();
    assert_ne!(second.metadata().connection_id, first_id, "invalidate -> acquire must not reuse the destroyed resource");
}

#[tokio::test]
async fn bounded_pool_never_exceeds_its_permit_budget() {
    let (_counter, allocator) = counting_allocator();
    let pool = Arc::new(Pool::builder(allocator).max_size(3).build_lazy());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let pooled = pool.acquire().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(pool.size() <= 3, "live count exceeded permitMaximum()");
            pooled.release().await.unwrap();
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(pool.size(), 3, "every resource allocated once should still be live, just idle");
    assert_eq!(pool.num_idle(), 3);
}

#[tokio::test]
async fn max_pending_zero_fails_fast_instead_of_waiting() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator).max_size(1).max_pending(0).build_lazy();

    let held = pool.acquire().await.unwrap();

    match pool.acquire().await {
        Err(Error::PendingLimitExceeded { limit: 0 }) => {}
        other => panic!("expected a fail-fast PendingLimitExceeded, got {other:?}"),
    }

    held.release().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fifo_delivers_in_subscription_order() {
    let (_counter, allocator) = counting_allocator();
    let pool = Arc::new(Pool::builder(allocator).max_size(1).fifo().build_lazy());

    let held = pool.acquire().await.unwrap();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for id in 0..2 {
        let pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let pooled = pool.acquire().await.unwrap();
            order.lock().unwrap().push(id);
            pooled.release().await.unwrap();
        }));
        // Give each task a chance to enqueue before the next subscribes.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    held.release().await.unwrap();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1], "FIFO pool must serve earlier subscribers first");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifo_delivers_most_recent_subscriber_first() {
    let (_counter, allocator) = counting_allocator();
    let pool = Arc::new(Pool::builder(allocator).max_size(1).lifo().build_lazy());

    let held = pool.acquire().await.unwrap();

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for id in 0..2 {
        let pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let pooled = pool.acquire().await.unwrap();
            order.lock().unwrap().push(id);
            pooled.release().await.unwrap();
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    held.release().await.unwrap();

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![1, 0], "LIFO pool must serve the most recent subscriber first");
}

#[tokio::test]
async fn cancellation_before_delivery_does_not_consume_a_permit() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator).max_size(1).build_lazy();

    let held = pool.acquire().await.unwrap();

    // No permit and no idle slot available, so this acquire sits pending;
    // racing it against an immediate sleep drops the future before
    // delivery, which must cancel the Borrower rather than leak a permit.
    tokio::select! {
        _ = pool.acquire() => panic!("acquire should not have completed while the only resource is held"),
        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
    }

    held.release().await.unwrap();

    // The permit must still be usable: a fresh acquire succeeds and the
    // pool never grew past its bound of 1.
    let pooled = pool.acquire().await.unwrap();
    assert_eq!(pool.size(), 1);
    pooled.release().await.unwrap();
}

#[tokio::test]
async fn max_lifetime_evicts_on_the_next_acquire() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator)
        .max_size(1)
        .max_lifetime(Duration::from_millis(10))
        .build_lazy();

    let first = pool.acquire().await.unwrap();
    let first_id = first.metadata().connection_id;
    first.release().await.unwrap();

    tokio::time::sleep(Duration::from_millis(25)).await;

    let second = pool.acquire().await.unwrap();
    assert_ne!(second.metadata().connection_id, first_id, "a stale resource must be evicted, not recycled");
    assert_eq!(pool.size(), 1, "eviction must not leak a permit");
}

#[tokio::test]
async fn after_release_eviction_on_a_bounded_pool_does_not_leak_a_permit() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator)
        .max_size(1)
        .after_release(|_r: &mut u64, _meta| Box::pin(async { Ok::<_, DynError>(false) }))
        .build_lazy();

    let first = pool.acquire().await.unwrap();
    let first_id = first.metadata().connection_id;
    first.release().await.unwrap();

    assert_eq!(pool.size(), 0, "the evicted resource must free its permit, not hold it");

    let second = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
        .await
        .expect("acquire must not hang after a release-time eviction")
        .unwrap();
    assert_ne!(second.metadata().connection_id, first_id, "a fresh resource must be allocated in its place");
}

#[tokio::test]
async fn dispose_drains_idle_and_rejects_further_acquisitions() {
    let (_counter, allocator) = counting_allocator();
    let pool = Pool::builder(allocator).max_size(2).initial_size(2).build().await.unwrap();

    assert_eq!(pool.num_idle(), 2);

    pool.dispose().await;

    assert!(pool.is_disposed());
    assert_eq!(pool.num_idle(), 0, "dispose() must drain every idle resource");

    match pool.acquire().await {
        Err(Error::Shutdown) => {}
        other => panic!("expected Shutdown after dispose(), got {other:?}"),
    }
}

/// With `max_pending(0)`, a borrower racing an in-flight
/// `invalidate()` must either see a freshly allocated resource or fail fast —
/// it must never observe the invalidated resource.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalidate_race_never_hands_out_the_destroyed_resource() {
    let (_counter, allocator) = counting_allocator();
    let pool = Arc::new(Pool::builder(allocator).max_size(1).max_pending(0).build_lazy());

    let a_pool = Arc::clone(&pool);
    let held = a_pool.acquire().await.unwrap();
    let destroyed_id = held.metadata().connection_id;

    let b_pool = Arc::clone(&pool);
    let (invalidate_result, acquire_result) =
        tokio::join!(held.invalidate(), async { b_pool.acquire().await });

    let () = invalidate_result;
    match acquire_result {
        Ok(pooled) => {
            assert_ne!(pooled.metadata().connection_id, destroyed_id);
            pooled.release().await.unwrap();
        }
        Err(Error::PendingLimitExceeded { limit: 0 }) => {}
        Err(other) => panic!("unexpected error racing invalidate against acquire: {other:?}"),
    }
}

#[cfg(feature = "simple-metrics")]
#[tokio::test]
async fn simple_metrics_observe_recycle_and_destroy() {
    use respool::metrics::SimplePoolMetrics;

    let (_counter, allocator) = counting_allocator();
    let metrics = SimplePoolMetrics::new();
    let pool = Pool::builder(allocator)
        .max_size(1)
        .metrics_recorder(metrics.recorder())
        .build_lazy();

    let pooled = pool.acquire().await.unwrap();
    pooled.release().await.unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.recycled_count, 1);
    assert_eq!(snapshot.allocation_success.sample_count, 1);
}
