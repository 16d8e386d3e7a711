//! The pending-borrower queue.
//!
//! `crossbeam_queue` has no lock-free LIFO container, so both orderings share
//! one `Mutex<VecDeque<_>>`-backed implementation; the drain loop is the sole
//! consumer and critical sections here never cross an `.await` point, so the
//! lock never blocks an async task for long.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::borrower::Borrower;

/// Delivery order for borrowers waiting on a permit or idle slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrdering {
    /// First subscriber in, first served.
    Fifo,
    /// Most recent subscriber served first.
    Lifo,
}

impl Default for QueueOrdering {
    fn default() -> Self {
        QueueOrdering::Fifo
    }
}

struct Inner<R> {
    queue: VecDeque<Arc<Borrower<R>>>,
    terminated: bool,
}

/// The ordered collection of outstanding `acquire()` calls not yet matched to
/// a resource.
///
/// Termination is represented here as the `terminated` flag: once set,
/// `push` always fails and `terminate` empties whatever remains.
pub(crate) struct PendingQueue<R> {
    ordering: QueueOrdering,
    seq: AtomicU64,
    inner: Mutex<Inner<R>>,
}

impl<R> PendingQueue<R> {
    pub(crate) fn new(ordering: QueueOrdering) -> Self {
        Self {
            ordering,
            seq: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                terminated: false,
            }),
        }
    }

    /// Returns a strictly increasing arrival sequence number, used both for
    /// FIFO/LIFO tie-breaking and for test assertions.
    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Enqueues `borrower`. Fails (returning the borrower back) if the queue
    /// has already been terminated by `dispose()`.
    pub(crate) fn push(&self, borrower: Arc<Borrower<R>>) -> Result<(), Arc<Borrower<R>>> {
        let mut inner = self.inner.lock().expect("pending queue mutex poisoned");
        if inner.terminated {
            return Err(borrower);
        }
        inner.queue.push_back(borrower);
        Ok(())
    }

    /// Pops the next borrower in configured order, or `None` if empty.
    pub(crate) fn poll(&self) -> Option<Arc<Borrower<R>>> {
        let mut inner = self.inner.lock().expect("pending queue mutex poisoned");
        match self.ordering {
            QueueOrdering::Fifo => inner.queue.pop_front(),
            QueueOrdering::Lifo => inner.queue.pop_back(),
        }
    }

    /// Puts a borrower back in the position `poll()` will retrieve it from
    /// next, for the case where it was popped but couldn't be matched after
    /// all (e.g. its idle slot failed eviction). Distinct from `push`, which
    /// always enqueues at the arrival end regardless of poll order.
    pub(crate) fn requeue(&self, borrower: Arc<Borrower<R>>) {
        let mut inner = self.inner.lock().expect("pending queue mutex poisoned");
        if inner.terminated {
            return;
        }
        match self.ordering {
            QueueOrdering::Fifo => inner.queue.push_front(borrower),
            QueueOrdering::Lifo => inner.queue.push_back(borrower),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("pending queue mutex poisoned").queue.len()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.inner.lock().expect("pending queue mutex poisoned").terminated
    }

    /// Marks the queue terminated and returns every borrower still waiting,
    /// so the caller can fail them with `Error::Shutdown`.
    pub(crate) fn terminate(&self) -> Vec<Arc<Borrower<R>>> {
        let mut inner = self.inner.lock().expect("pending queue mutex poisoned");
        inner.terminated = true;
        inner.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borrower(seq: u64) -> Arc<Borrower<u32>> {
        Borrower::new(seq).0
    }

    #[test]
    fn fifo_orders_by_arrival() {
        let q: PendingQueue<u32> = PendingQueue::new(QueueOrdering::Fifo);
        q.push(borrower(0)).unwrap();
        q.push(borrower(1)).unwrap();
        assert_eq!(q.poll().unwrap().seq, 0);
        assert_eq!(q.poll().unwrap().seq, 1);
    }

    #[test]
    fn lifo_orders_by_recency() {
        let q: PendingQueue<u32> = PendingQueue::new(QueueOrdering::Lifo);
        q.push(borrower(0)).unwrap();
        q.push(borrower(1)).unwrap();
        assert_eq!(q.poll().unwrap().seq, 1);
        assert_eq!(q.poll().unwrap().seq, 0);
    }

    #[test]
    fn terminated_queue_rejects_pushes() {
        let q: PendingQueue<u32> = PendingQueue::new(QueueOrdering::Fifo);
        q.push(borrower(0)).unwrap();
        let failed = q.terminate();
        assert_eq!(failed.len(), 1);
        assert!(q.push(borrower(1)).is_err());
    }
}
