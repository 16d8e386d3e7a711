//! The idle resource store: a lock-free queue plus a separate atomic length,
//! since `ArrayQueue::len()` can spin under contention. The bounded variant
//! is sized to the allocation strategy's permit ceiling: every live resource
//! is acquired, idle, or in-flight, so an idle store bounded by the permit
//! max can never overflow. The unbounded variant backs onto
//! `crossbeam_queue::SegQueue`, which has no capacity.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::{ArrayQueue, SegQueue};

use crate::pooled_ref::Slot;

enum Backing<R> {
    Bounded(ArrayQueue<Slot<R>>),
    Unbounded(SegQueue<Slot<R>>),
}

pub(crate) struct IdleStore<R> {
    backing: Backing<R>,
    len: AtomicUsize,
}

impl<R> IdleStore<R> {
    pub(crate) fn bounded(capacity: i64) -> Self {
        let capacity = usize::try_from(capacity).unwrap_or(usize::MAX).max(1);
        Self {
            backing: Backing::Bounded(ArrayQueue::new(capacity)),
            len: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unbounded() -> Self {
        Self {
            backing: Backing::Unbounded(SegQueue::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Returns a slot to the idle store. Only called with a slot that has
    /// already passed the eviction predicate.
    pub(crate) fn push(&self, slot: Slot<R>) {
        match &self.backing {
            Backing::Bounded(q) => {
                if q.push(slot).is_ok() {
                    self.len.fetch_add(1, Ordering::AcqRel);
                }
                // A push failure here would mean `live` exceeded
                // `permitMaximum()`, which invariant 2 forbids; the slot is
                // silently dropped rather than panicking in a release path.
            }
            Backing::Unbounded(q) => {
                q.push(slot);
                self.len.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    pub(crate) fn pop(&self) -> Option<Slot<R>> {
        let popped = match &self.backing {
            Backing::Bounded(q) => q.pop(),
            Backing::Unbounded(q) => q.pop(),
        };
        if popped.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        popped
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Drains every idle slot, for use during `dispose()`.
    pub(crate) fn drain(&self) -> Vec<Slot<R>> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(slot) = self.pop() {
            out.push(slot);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooled_ref::Metadata;

    fn slot(v: u32) -> Slot<u32> {
        Slot {
            resource: v,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn bounded_store_respects_capacity() {
        let store = IdleStore::bounded(2);
        store.push(slot(1));
        store.push(slot(2));
        store.push(slot(3));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn fifo_pop_order() {
        let store = IdleStore::unbounded();
        store.push(slot(1));
        store.push(slot(2));
        assert_eq!(store.pop().unwrap().resource, 1);
        assert_eq!(store.pop().unwrap().resource, 2);
        assert!(store.pop().is_none());
    }
}
