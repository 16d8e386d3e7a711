//! A ready-to-use [`PoolMetricsRecorder`] implementation: an
//! exponential-moving-average timing stat per latency sink, a `.snapshot()`
//! API, and atomics throughout with a single acquire/release fence pair per
//! update rather than per field.

use std::cmp;
use std::fmt::{self, Formatter};
use std::sync::atomic::{self, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::PoolMetricsRecorder;

/// A simple, atomics-backed metrics recorder.
///
/// ```
/// use respool::metrics::SimplePoolMetrics;
///
/// let metrics = SimplePoolMetrics::new();
/// let recorder = metrics.recorder();
/// // pass `recorder` to `PoolOptions::metrics_recorder()`
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.recycled_count, 0);
/// ```
#[derive(Clone)]
pub struct SimplePoolMetrics {
    inner: Arc<Inner>,
}

/// A snapshot of everything [`SimplePoolMetrics`] has observed so far.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SimplePoolMetricsSnapshot {
    pub allocation_success: SimpleTimingStats,
    pub allocation_failure: SimpleTimingStats,
    pub reset: SimpleTimingStats,
    pub destroy: SimpleTimingStats,
    pub lifetime_on_destroy: SimpleTimingStats,
    pub idle_duration_on_recycle: SimpleTimingStats,
    pub recycled_count: u64,
    pub fast_path_count: u64,
    pub slow_path_count: u64,
}

/// Min/average/max for one timing metric. The average is an [Exponential
/// Moving Average](https://en.wikipedia.org/wiki/Moving_average#Exponential_moving_average).
#[derive(Debug, Clone, Default)]
pub struct SimpleTimingStats {
    pub sample_count: u64,
    pub min: Duration,
    pub average: Duration,
    pub max: Duration,
}

#[derive(Default)]
struct AtomicTimingStats {
    sample_count: AtomicU64,
    min_nanos: AtomicU64,
    average_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl AtomicTimingStats {
    fn update(&self, ema_coefficient: f64, sample: Duration) {
        use Ordering::Relaxed;

        let nanos: u64 = sample
            .as_nanos()
            .try_into()
            .expect("BUG: duration sample is too large to record");

        atomic::fence(Ordering::Acquire);

        self.sample_count.fetch_add(1, Relaxed);

        let _ = self.min_nanos.fetch_update(Relaxed, Relaxed, |prev| {
            if prev == 0 {
                return Some(nanos);
            }
            Some(cmp::min(prev, nanos))
        });

        let _ = self.average_nanos.fetch_update(Relaxed, Relaxed, |avg| {
            if avg == 0 {
                return Some(nanos);
            }
            Some(((nanos as f64 * ema_coefficient) + (avg as f64 * (1.0 - ema_coefficient))) as u64)
        });

        let _ = self
            .max_nanos
            .fetch_update(Relaxed, Relaxed, |prev| Some(cmp::max(prev, nanos)));

        atomic::fence(Ordering::Release);
    }

    /// Assumes an acquire fence was already issued by the caller.
    fn get(&self) -> SimpleTimingStats {
        use Ordering::Relaxed;
        SimpleTimingStats {
            sample_count: self.sample_count.load(Relaxed),
            min: Duration::from_nanos(self.min_nanos.load(Relaxed)),
            average: Duration::from_nanos(self.average_nanos.load(Relaxed)),
            max: Duration::from_nanos(self.max_nanos.load(Relaxed)),
        }
    }
}

#[derive(Default)]
struct Inner {
    ema_coefficient: f64,
    allocation_success: AtomicTimingStats,
    allocation_failure: AtomicTimingStats,
    reset: AtomicTimingStats,
    destroy: AtomicTimingStats,
    lifetime_on_destroy: AtomicTimingStats,
    idle_duration_on_recycle: AtomicTimingStats,
    recycled_count: AtomicU64,
    fast_path_count: AtomicU64,
    slow_path_count: AtomicU64,
}

impl SimplePoolMetrics {
    /// Construct with a default EMA coefficient of `0.01`.
    pub fn new() -> Self {
        Self::with_ema_coefficient(0.01)
    }

    /// Construct with a custom EMA coefficient: closer to `1.0` weights
    /// recent samples more heavily, closer to `0.0` smooths out noise at the
    /// cost of reacting to changes more slowly.
    ///
    /// # Panics
    /// Panics if `ema_coefficient` is not in `(0, 1)`.
    pub fn with_ema_coefficient(ema_coefficient: f64) -> Self {
        assert!(ema_coefficient.is_normal());
        assert!(ema_coefficient > 0.0 && ema_coefficient < 1.0);

        Self {
            inner: Arc::new(Inner {
                ema_coefficient,
                ..Default::default()
            }),
        }
    }

    /// Returns a [`PoolMetricsRecorder`] implementation to pass to
    /// `PoolOptions::metrics_recorder()`.
    pub fn recorder(&self) -> Arc<dyn PoolMetricsRecorder> {
        self.inner.clone()
    }

    /// Loads every metric at once.
    pub fn snapshot(&self) -> SimplePoolMetricsSnapshot {
        atomic::fence(Ordering::Acquire);
        use Ordering::Relaxed;
        SimplePoolMetricsSnapshot {
            allocation_success: self.inner.allocation_success.get(),
            allocation_failure: self.inner.allocation_failure.get(),
            reset: self.inner.reset.get(),
            destroy: self.inner.destroy.get(),
            lifetime_on_destroy: self.inner.lifetime_on_destroy.get(),
            idle_duration_on_recycle: self.inner.idle_duration_on_recycle.get(),
            recycled_count: self.inner.recycled_count.load(Relaxed),
            fast_path_count: self.inner.fast_path_count.load(Relaxed),
            slow_path_count: self.inner.slow_path_count.load(Relaxed),
        }
    }
}

impl Default for SimplePoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimplePoolMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimplePoolMetrics")
            .field("current", &self.snapshot())
            .finish()
    }
}

impl PoolMetricsRecorder for Inner {
    fn allocation_succeeded(&self, latency: Duration) {
        self.allocation_success.update(self.ema_coefficient, latency);
    }

    fn allocation_failed(&self, latency: Duration) {
        self.allocation_failure.update(self.ema_coefficient, latency);
    }

    fn reset_succeeded(&self, latency: Duration) {
        self.reset.update(self.ema_coefficient, latency);
    }

    fn destroy_completed(&self, latency: Duration) {
        self.destroy.update(self.ema_coefficient, latency);
    }

    fn lifetime_on_destroy(&self, lifetime: Duration) {
        self.lifetime_on_destroy.update(self.ema_coefficient, lifetime);
    }

    fn idle_duration_on_recycle(&self, idle: Duration) {
        self.idle_duration_on_recycle.update(self.ema_coefficient, idle);
    }

    fn recycled(&self) {
        self.recycled_count.fetch_add(1, Ordering::AcqRel);
    }

    fn fast_path_delivered(&self) {
        self.fast_path_count.fetch_add(1, Ordering::AcqRel);
    }

    fn slow_path_delivered(&self) {
        self.slow_path_count.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_recycle_count() {
        let metrics = SimplePoolMetrics::new();
        let recorder = metrics.recorder();
        recorder.recycled();
        recorder.recycled();
        recorder.fast_path_delivered();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.recycled_count, 2);
        assert_eq!(snapshot.fast_path_count, 1);
    }

    #[test]
    fn timing_stats_track_min_max() {
        let metrics = SimplePoolMetrics::new();
        let recorder = metrics.recorder();
        recorder.allocation_succeeded(Duration::from_millis(10));
        recorder.allocation_succeeded(Duration::from_millis(50));
        recorder.allocation_succeeded(Duration::from_millis(5));

        let stats = metrics.snapshot().allocation_success;
        assert_eq!(stats.sample_count, 3);
        assert_eq!(stats.min, Duration::from_millis(5));
        assert_eq!(stats.max, Duration::from_millis(50));
    }
}
