//! Where a delivered [`PooledRef`][crate::PooledRef] is published.
//!
//! Delivery itself (a one-shot channel send) never suspends, so the only
//! thing a scheduler controls is which thread performs that send: the
//! drain-owning thread, or a spawned task that lets the drain loop move on
//! to the next borrower without waiting on the hand-off.

use std::sync::Arc;

use crate::borrower::Borrower;
use crate::pooled_ref::PooledRef;

/// Controls where a matched `(Borrower, PooledRef)` pair is handed off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionScheduler {
    /// Deliver synchronously on the thread running the drain loop (the
    /// default).
    Immediate,
    /// Offload the delivery onto the Tokio runtime, letting the drain loop
    /// proceed to the next borrower without waiting on this hand-off.
    Spawn,
}

impl Default for AcquisitionScheduler {
    fn default() -> Self {
        AcquisitionScheduler::Immediate
    }
}

impl AcquisitionScheduler {
    /// Dispatches `value` to `borrower` per this scheduler's policy.
    ///
    /// `on_lost_race` is invoked (on whichever thread ultimately performs
    /// the send) if the borrower had already been cancelled, so the caller
    /// can auto-release the resource instead of leaking a permit.
    pub(crate) fn dispatch<R, F>(self, borrower: Arc<Borrower<R>>, value: PooledRef<R>, on_lost_race: F)
    where
        R: Send + 'static,
        F: FnOnce(PooledRef<R>) + Send + 'static,
    {
        match self {
            AcquisitionScheduler::Immediate => {
                if let Some(value) = borrower.deliver(value) {
                    on_lost_race(value);
                }
            }
            AcquisitionScheduler::Spawn => {
                tokio::spawn(async move {
                    if let Some(value) = borrower.deliver(value) {
                        on_lost_race(value);
                    }
                });
            }
        }
    }
}
