//! Throughput of the acquire/release drain loop under contention.
//!
//! A `criterion_group` of parameterized benchmarks run against both a
//! single-threaded and a multi-threaded Tokio runtime, using
//! `Bencher::to_async`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Bencher, BenchmarkId, Criterion, Throughput};
use respool::{DynError, Pool};

fn build_pool(max_size: u32) -> Pool<u64> {
    let counter = Arc::new(AtomicU64::new(0));
    Pool::builder(move |_cx| {
        let counter = Arc::clone(&counter);
        async move { Ok::<_, DynError>(counter.fetch_add(1, Ordering::Relaxed)) }
    })
    .max_size(max_size)
    .build_lazy()
}

fn bench_acquire_release(c: &mut Criterion) {
    tracing_subscriber::fmt::try_init().ok();

    let mut group = c.benchmark_group("acquire_release(threaded, pool_size, concurrency)");

    for threaded in [false, true] {
        for pool_size in [1u32, 8, 64] {
            for concurrency in [1u64, 16, 64] {
                group.throughput(Throughput::Elements(concurrency));

                group.bench_with_input(
                    BenchmarkId::from_parameter(format!("({threaded}, {pool_size}, {concurrency})")),
                    &(threaded, pool_size, concurrency),
                    bench_round_trip,
                );
            }
        }
    }

    group.finish();
}

fn bench_round_trip(bencher: &mut Bencher, &(threaded, pool_size, concurrency): &(bool, u32, u64)) {
    bencher.to_async(build_runtime(threaded)).iter(|| async move {
        let pool = build_pool(pool_size);

        let mut handles = Vec::with_capacity(concurrency as usize);
        for _ in 0..concurrency {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let pooled = pool.acquire().await.expect("BUG: acquire failed under benchmark load");
                pooled.release().await.expect("BUG: release failed under benchmark load");
            }));
        }

        for handle in handles {
            handle.await.expect("BUG: task panicked");
        }
    });
}

fn build_runtime(threaded: bool) -> tokio::runtime::Runtime {
    let mut builder = if threaded {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.worker_threads(2);
        builder
    } else {
        tokio::runtime::Builder::new_current_thread()
    };

    builder.enable_all().build().unwrap()
}

criterion_group!(benches, bench_acquire_release);
criterion_main!(benches);
