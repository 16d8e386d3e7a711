//! Facade over the two pending-borrower backings: the plain FIFO/LIFO
//! [`PendingQueue`] and the thread-affinity variant's per-thread sub-queues.
//!
//! The drain loop only ever talks to this facade, so it doesn't need to know
//! which backing is in play.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::borrower::Borrower;
use crate::queue::{PendingQueue, QueueOrdering};

pub(crate) enum Pending<R> {
    Ordered(PendingQueue<R>),
    Affinity(AffinityPending<R>),
}

impl<R> Pending<R> {
    pub(crate) fn new(ordering: QueueOrdering, thread_affinity: bool) -> Self {
        if thread_affinity {
            Pending::Affinity(AffinityPending::new(ordering))
        } else {
            Pending::Ordered(PendingQueue::new(ordering))
        }
    }

    pub(crate) fn next_seq(&self) -> u64 {
        match self {
            Pending::Ordered(q) => q.next_seq(),
            Pending::Affinity(a) => a.next_seq(),
        }
    }

    pub(crate) fn push(&self, borrower: Arc<Borrower<R>>) -> Result<(), Arc<Borrower<R>>> {
        match self {
            Pending::Ordered(q) => q.push(borrower),
            Pending::Affinity(a) => a.push(borrower),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Pending::Ordered(q) => q.len(),
            Pending::Affinity(a) => a.len(),
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        match self {
            Pending::Ordered(q) => q.is_terminated(),
            Pending::Affinity(a) => a.is_terminated(),
        }
    }

    pub(crate) fn terminate(&self) -> Vec<Arc<Borrower<R>>> {
        match self {
            Pending::Ordered(q) => q.terminate(),
            Pending::Affinity(a) => a.terminate(),
        }
    }

    /// Plain next-in-order borrower, used by the drain loop's allocation
    /// path (case A), where there's no freed slot whose thread could matter.
    pub(crate) fn poll(&self) -> Option<Arc<Borrower<R>>> {
        match self {
            Pending::Ordered(q) => q.poll(),
            Pending::Affinity(a) => a.poll(),
        }
    }

    /// Next borrower to receive a freed idle slot (drain loop case B),
    /// together with whether it was matched via the same-thread fast path.
    /// Always `(_, false)` for the non-affinity backing.
    pub(crate) fn poll_for_delivery(&self) -> Option<(Arc<Borrower<R>>, bool)> {
        match self {
            Pending::Ordered(q) => q.poll().map(|b| (b, false)),
            Pending::Affinity(a) => a.poll_for_delivery(),
        }
    }

    /// Puts a borrower back for another pass, e.g. after its matched idle
    /// slot turned out to need eviction.
    pub(crate) fn requeue(&self, borrower: Arc<Borrower<R>>) {
        match self {
            Pending::Ordered(q) => q.requeue(borrower),
            Pending::Affinity(a) => a.requeue(borrower),
        }
    }
}

struct Inner<R> {
    by_thread: HashMap<ThreadId, VecDeque<Arc<Borrower<R>>>>,
    len: usize,
    terminated: bool,
}

/// Per-thread LIFO sub-queues of pending borrowers, indexed by the thread
/// that subscribed. A freed slot is first offered to a borrower on the
/// current (releasing) thread; only if none is waiting there does the
/// search fall back cross-thread.
///
/// Fairness is sacrificed for cache/context locality: ties across distinct
/// threads are broken by arrival sequence on a best-effort basis only, not a
/// strict guarantee.
pub(crate) struct AffinityPending<R> {
    ordering: QueueOrdering,
    seq: AtomicU64,
    inner: Mutex<Inner<R>>,
}

impl<R> AffinityPending<R> {
    fn new(ordering: QueueOrdering) -> Self {
        Self {
            ordering,
            seq: AtomicU64::new(0),
            inner: Mutex::new(Inner {
                by_thread: HashMap::new(),
                len: 0,
                terminated: false,
            }),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, borrower: Arc<Borrower<R>>) -> Result<(), Arc<Borrower<R>>> {
        let mut inner = self.inner.lock().expect("affinity pending mutex poisoned");
        if inner.terminated {
            return Err(borrower);
        }
        inner
            .by_thread
            .entry(borrower.thread_id)
            .or_default()
            .push_back(borrower);
        inner.len += 1;
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("affinity pending mutex poisoned").len
    }

    fn is_terminated(&self) -> bool {
        self.inner.lock().expect("affinity pending mutex poisoned").terminated
    }

    fn terminate(&self) -> Vec<Arc<Borrower<R>>> {
        let mut inner = self.inner.lock().expect("affinity pending mutex poisoned");
        inner.terminated = true;
        inner.len = 0;
        inner.by_thread.drain().flat_map(|(_, dq)| dq).collect()
    }

    fn poll(&self) -> Option<Arc<Borrower<R>>> {
        let mut inner = self.inner.lock().expect("affinity pending mutex poisoned");
        let thread = *inner
            .by_thread
            .iter()
            .filter(|(_, dq)| !dq.is_empty())
            .min_by_key(|(_, dq)| dq.front().map(|b| b.seq))?
            .0;
        let borrower = pop_from(&mut inner, thread, self.ordering);
        if borrower.is_some() {
            inner.len -= 1;
        }
        borrower
    }

    fn poll_for_delivery(&self) -> Option<(Arc<Borrower<R>>, bool)> {
        let current = std::thread::current().id();
        let mut inner = self.inner.lock().expect("affinity pending mutex poisoned");

        if let Some(dq) = inner.by_thread.get_mut(&current) {
            if let Some(borrower) = dq.pop_back() {
                if dq.is_empty() {
                    inner.by_thread.remove(&current);
                }
                inner.len -= 1;
                return Some((borrower, true));
            }
        }

        let thread = *inner
            .by_thread
            .iter()
            .filter(|(_, dq)| !dq.is_empty())
            .min_by_key(|(_, dq)| dq.front().map(|b| b.seq))?
            .0;
        let borrower = pop_from(&mut inner, thread, self.ordering)?;
        inner.len -= 1;
        Some((borrower, false))
    }

    fn requeue(&self, borrower: Arc<Borrower<R>>) {
        let mut inner = self.inner.lock().expect("affinity pending mutex poisoned");
        if inner.terminated {
            return;
        }
        inner
            .by_thread
            .entry(borrower.thread_id)
            .or_default()
            .push_back(borrower);
        inner.len += 1;
    }
}

fn pop_from<R>(inner: &mut Inner<R>, thread: ThreadId, ordering: QueueOrdering) -> Option<Arc<Borrower<R>>> {
    let dq = inner.by_thread.get_mut(&thread)?;
    let borrower = match ordering {
        QueueOrdering::Fifo => dq.pop_front(),
        QueueOrdering::Lifo => dq.pop_back(),
    };
    if dq.is_empty() {
        inner.by_thread.remove(&thread);
    }
    borrower
}

#[cfg(test)]
mod tests {
    use super::*;

    fn borrower(seq: u64) -> Arc<Borrower<u32>> {
        Borrower::new(seq).0
    }

    #[test]
    fn affinity_fast_path_prefers_current_thread() {
        let pending: AffinityPending<u32> = AffinityPending::new(QueueOrdering::Fifo);
        pending.push(borrower(0)).unwrap();
        let (_borrower, fast_path) = pending.poll_for_delivery().unwrap();
        assert!(fast_path, "the only waiter subscribed on this thread");
    }

    #[test]
    fn affinity_falls_back_cross_thread() {
        let pending: AffinityPending<u32> = AffinityPending::new(QueueOrdering::Fifo);
        let handle = std::thread::spawn(|| borrower(0));
        let other_thread_borrower = handle.join().unwrap();
        pending.push(other_thread_borrower).unwrap();

        let (_borrower, fast_path) = pending.poll_for_delivery().unwrap();
        assert!(!fast_path, "only waiter was subscribed on a different thread");
    }
}
