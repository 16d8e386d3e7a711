//! The metrics recorder collaborator contract: an interface of sink methods
//! the pool calls at well-defined points. The pool never reads from the
//! recorder, so every method takes `&self` and returns nothing; every method
//! has a no-op default so implementors only override the sinks they care
//! about.

#[cfg(feature = "simple-metrics")]
pub mod simple;

use std::time::Duration;

#[cfg(feature = "simple-metrics")]
pub use simple::{SimplePoolMetrics, SimplePoolMetricsSnapshot, SimpleTimingStats};

/// Sink methods the drain loop and release pipeline call at well-defined
/// points.
pub trait PoolMetricsRecorder: Send + Sync + 'static {
    /// A new resource finished allocating successfully; `latency` is the
    /// time the allocator took.
    fn allocation_succeeded(&self, latency: Duration) {
        let _ = latency;
    }

    /// The allocator returned an error; `latency` is the time spent before
    /// failing.
    fn allocation_failed(&self, latency: Duration) {
        let _ = latency;
    }

    /// The release handler (reset pipeline) completed successfully.
    fn reset_succeeded(&self, latency: Duration) {
        let _ = latency;
    }

    /// The destroy handler completed (errors are swallowed, not reported
    /// here beyond latency).
    fn destroy_completed(&self, latency: Duration) {
        let _ = latency;
    }

    /// The total time a resource was alive (allocation to destroy).
    fn lifetime_on_destroy(&self, lifetime: Duration) {
        let _ = lifetime;
    }

    /// The time a resource spent idle before being handed to a borrower.
    fn idle_duration_on_recycle(&self, idle: Duration) {
        let _ = idle;
    }

    /// A resource was returned to the idle store (recycled) instead of
    /// being evicted.
    fn recycled(&self) {}

    /// A freed slot was delivered to a borrower subscribed on the same
    /// thread (thread-affinity variant only).
    fn fast_path_delivered(&self) {}

    /// A freed slot was delivered to a borrower subscribed on a different
    /// thread (thread-affinity variant only).
    fn slow_path_delivered(&self) {}
}

/// A recorder that discards every sample. Used as the default when no
/// recorder is configured.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NoopMetrics;

impl PoolMetricsRecorder for NoopMetrics {}
