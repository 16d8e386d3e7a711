//! The per-acquisition waiter object: a state machine with exactly one
//! winning transition out of `Pending`, delivered through a one-shot channel
//! so the drain loop never has to block on a waiter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

use tokio::sync::oneshot;

use crate::error::Error;
use crate::pooled_ref::PooledRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BorrowerState {
    Pending = 0,
    Cancelled = 1,
    Delivered = 2,
    Failed = 3,
}

impl BorrowerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BorrowerState::Pending,
            1 => BorrowerState::Cancelled,
            2 => BorrowerState::Delivered,
            _ => BorrowerState::Failed,
        }
    }
}

pub(crate) type Delivery<R> = oneshot::Receiver<Result<PooledRef<R>, Error>>;

/// One outstanding `acquire()` call, enqueued in the pending queue until it
/// is matched, cancelled, or failed.
pub(crate) struct Borrower<R> {
    pub(crate) seq: u64,
    pub(crate) thread_id: ThreadId,
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<Result<PooledRef<R>, Error>>>>,
}

impl<R> Borrower<R> {
    pub(crate) fn new(seq: u64) -> (std::sync::Arc<Self>, Delivery<R>) {
        let (tx, rx) = oneshot::channel();
        let borrower = Self {
            seq,
            thread_id: std::thread::current().id(),
            state: AtomicU8::new(BorrowerState::Pending as u8),
            sender: Mutex::new(Some(tx)),
        };
        (std::sync::Arc::new(borrower), rx)
    }

    pub(crate) fn state(&self) -> BorrowerState {
        BorrowerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.state() == BorrowerState::Pending
    }

    /// Marks this borrower cancelled if it is still pending. Returns `true`
    /// if this call performed the transition.
    pub(crate) fn cancel(&self) -> bool {
        self.state
            .compare_exchange(
                BorrowerState::Pending as u8,
                BorrowerState::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Attempts to deliver `value` to this borrower. If the borrower was
    /// already cancelled (or the receiver dropped), the value is handed back
    /// to the caller, which must treat it as an auto-release to avoid
    /// leaking a permit.
    pub(crate) fn deliver(&self, value: PooledRef<R>) -> Option<PooledRef<R>> {
        if self
            .state
            .compare_exchange(
                BorrowerState::Pending as u8,
                BorrowerState::Delivered as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Some(value);
        }

        let sender = self.sender.lock().expect("borrower sender mutex poisoned").take();
        match sender {
            Some(tx) => match tx.send(Ok(value)) {
                Ok(()) => None,
                Err(Ok(value)) => Some(value),
                Err(Err(_)) => None,
            },
            None => Some(value),
        }
    }

    /// Fails this borrower with `err`, if still pending.
    pub(crate) fn fail(&self, err: Error) {
        if self
            .state
            .compare_exchange(
                BorrowerState::Pending as u8,
                BorrowerState::Failed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        if let Some(tx) = self.sender.lock().expect("borrower sender mutex poisoned").take() {
            let _ = tx.send(Err(err));
        }
    }
}
