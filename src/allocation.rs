//! Permit accounting for the pool's size budget: a single atomic counter, a
//! CAS loop for claiming permits, and a saturating "unbounded" mode reporting
//! [`i64::MAX`] as its ceiling.

use std::sync::atomic::{AtomicI64, Ordering};

/// Permit accounting used by the drain loop to decide whether a fresh
/// allocation may be started.
///
/// Implementations must be safe to call from any thread without holding a
/// lock across an `.await` point; all operations here are synchronous.
pub trait AllocationStrategy: Send + Sync + 'static {
    /// Attempt to claim up to `desired` permits, returning the number
    /// actually granted (`0..=desired`).
    fn try_get_permits(&self, desired: i64) -> i64;

    /// Return `n` previously granted permits to the budget.
    fn return_permits(&self, n: i64);

    /// A best-effort estimate of currently available permits.
    fn estimate_permits(&self) -> i64;

    /// The maximum number of permits this strategy will ever grant
    /// concurrently. `i64::MAX` for the unbounded strategy.
    fn permit_maximum(&self) -> i64;

    /// The number of permits currently granted and not yet returned.
    fn permit_granted(&self) -> i64;
}

/// Grants up to `max` permits total, never more.
#[derive(Debug)]
pub struct Bounded {
    available: AtomicI64,
    granted: AtomicI64,
    max: i64,
}

impl Bounded {
    pub fn new(max: i64) -> Self {
        assert!(max >= 0, "bounded allocation strategy requires max >= 0");
        Self {
            available: AtomicI64::new(max),
            granted: AtomicI64::new(0),
            max,
        }
    }
}

impl AllocationStrategy for Bounded {
    fn try_get_permits(&self, desired: i64) -> i64 {
        let mut available = self.available.load(Ordering::Acquire);
        loop {
            if available <= 0 {
                return 0;
            }
            let grant = available.min(desired);
            match self.available.compare_exchange_weak(
                available,
                available - grant,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.granted.fetch_add(grant, Ordering::AcqRel);
                    return grant;
                }
                Err(observed) => available = observed,
            }
        }
    }

    fn return_permits(&self, n: i64) {
        if n == 0 {
            return;
        }
        self.available.fetch_add(n, Ordering::AcqRel);
        self.granted.fetch_sub(n, Ordering::AcqRel);
    }

    fn estimate_permits(&self) -> i64 {
        self.available.load(Ordering::Acquire).max(0)
    }

    fn permit_maximum(&self) -> i64 {
        self.max
    }

    fn permit_granted(&self) -> i64 {
        self.granted.load(Ordering::Acquire)
    }
}

/// Never refuses a permit request; `permit_maximum()` reports `i64::MAX`.
#[derive(Debug, Default)]
pub struct Unbounded {
    granted: AtomicI64,
}

impl Unbounded {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocationStrategy for Unbounded {
    fn try_get_permits(&self, desired: i64) -> i64 {
        if desired <= 0 {
            return 0;
        }
        self.granted.fetch_add(desired, Ordering::AcqRel);
        desired
    }

    fn return_permits(&self, n: i64) {
        if n == 0 {
            return;
        }
        self.granted.fetch_sub(n, Ordering::AcqRel);
    }

    fn estimate_permits(&self) -> i64 {
        i64::MAX
    }

    fn permit_maximum(&self) -> i64 {
        i64::MAX
    }

    fn permit_granted(&self) -> i64 {
        self.granted.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_permits_are_conserved() {
        let strategy = Bounded::new(3);
        let mut grants = Vec::new();
        for _ in 0..10 {
            grants.push(strategy.try_get_permits(1));
        }
        assert_eq!(grants.iter().filter(|&&g| g == 1).count(), 3);
        assert_eq!(grants.iter().filter(|&&g| g == 0).count(), 7);

        for &g in &grants {
            strategy.return_permits(g);
        }
        assert_eq!(strategy.permit_granted(), 0);
    }

    #[test]
    fn unbounded_always_grants() {
        let strategy = Unbounded::new();
        assert_eq!(strategy.try_get_permits(i64::MAX), i64::MAX);
        assert_eq!(strategy.try_get_permits(i64::MAX), i64::MAX);
        assert_eq!(strategy.estimate_permits(), i64::MAX);
    }
}
