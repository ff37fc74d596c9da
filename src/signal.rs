//! Single-shot completion signal for asynchronous reads
//!
//! A [`CompletionSignal`] transitions from unset to set at most once, when the
//! transfer it belongs to finishes. The transfer's outcome (byte count and the
//! destination buffer, or the failure) is committed under the same lock that
//! flips the flag, so no observer can see the set state without the final
//! result also being visible. Two observation modes exist: async [`wait`] and
//! non-blocking [`is_complete`] polling. There is no cancellation; a submitted
//! request always eventually completes.
//!
//! [`wait`]: CompletionSignal::wait
//! [`is_complete`]: CompletionSignal::is_complete

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::FileOpError;

/// Final result of an asynchronous transfer: byte count plus the returned
/// destination buffer, or the failure condition
pub type ReadOutcome = std::result::Result<(usize, Vec<u8>), FileOpError>;

/// Set-once completion object observable by guest wait/poll logic
///
/// The completed flag is checked inside the waiter mutex; setting the flag,
/// committing the outcome, and draining the waiter queue happen atomically
/// under that mutex, so a waiter can never register after the transition and
/// miss its wakeup.
pub struct CompletionSignal {
    /// Fast-path completion flag; authoritative state lives under the mutex
    completed: AtomicBool,
    inner: Mutex<SignalInner>,
}

struct SignalInner {
    outcome: Option<ReadOutcome>,
    waiters: VecDeque<Waker>,
}

impl CompletionSignal {
    /// Create a signal in the unset state
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            completed: AtomicBool::new(false),
            inner: Mutex::new(SignalInner {
                outcome: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit the outcome and fire the signal
    ///
    /// The buffer and byte count become visible before the flag flips. A
    /// second call is a producer bug; the committed outcome is never
    /// replaced.
    pub(crate) fn complete(&self, outcome: ReadOutcome) {
        let wakers = {
            let mut inner = self.lock();
            debug_assert!(inner.outcome.is_none(), "completion signal fired twice");
            if self.completed.load(Ordering::Acquire) {
                return;
            }
            inner.outcome = Some(outcome);
            self.completed.store(true, Ordering::Release);
            std::mem::take(&mut inner.waiters)
        };
        // Wake outside the lock; wakers may run arbitrary code.
        for waker in wakers {
            waker.wake();
        }
    }

    /// Poll-mode observation: true once the transfer has completed
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Wait until the signal fires
    ///
    /// Resolves immediately if the signal is already set. Any number of
    /// observers may wait; all of them are woken by the single transition.
    pub async fn wait(&self) {
        WaitFuture { signal: self }.await;
    }

    /// Take the committed outcome, including the destination buffer
    ///
    /// Returns `None` while the transfer is still in flight, and `None` again
    /// after the outcome has been taken once; the buffer has exactly one
    /// owner. [`is_complete`](Self::is_complete) keeps reporting true either
    /// way.
    #[must_use]
    pub fn take_outcome(&self) -> Option<ReadOutcome> {
        self.lock().outcome.take()
    }
}

impl std::fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("completed", &self.is_complete())
            .finish_non_exhaustive()
    }
}

struct WaitFuture<'a> {
    signal: &'a CompletionSignal,
}

impl Future for WaitFuture<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The flag must be checked while holding the lock; a lock-free check
        // could race with complete() draining the queue and lose the wakeup.
        let mut inner = self.signal.lock();
        if self.signal.completed.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        inner.waiters.push_back(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_unset_with_no_outcome() {
        let signal = CompletionSignal::new();
        assert!(!signal.is_complete());
        assert!(signal.take_outcome().is_none());
    }

    #[test]
    fn outcome_is_visible_once_set() {
        let signal = CompletionSignal::new();
        signal.complete(Ok((3, vec![1, 2, 3])));
        assert!(signal.is_complete());

        let (count, buf) = signal.take_outcome().unwrap().unwrap();
        assert_eq!(count, 3);
        assert_eq!(buf, vec![1, 2, 3]);

        // The buffer has exactly one owner.
        assert!(signal.take_outcome().is_none());
        assert!(signal.is_complete());
    }

    #[test]
    fn failure_outcomes_are_preserved() {
        let signal = CompletionSignal::new();
        signal.complete(Err(FileOpError::ObjectGone));
        assert!(matches!(
            signal.take_outcome(),
            Some(Err(FileOpError::ObjectGone))
        ));
    }

    #[compio::test]
    async fn wait_returns_immediately_when_already_set() {
        let signal = CompletionSignal::new();
        signal.complete(Ok((0, Vec::new())));
        signal.wait().await;
    }

    #[compio::test]
    async fn wait_wakes_when_completed_by_another_task() {
        let signal = Arc::new(CompletionSignal::new());
        let completer = Arc::clone(&signal);
        let task = compio::runtime::spawn(async move {
            completer.complete(Ok((1, vec![9])));
        });

        signal.wait().await;
        assert!(signal.is_complete());
        let (count, buf) = signal.take_outcome().unwrap().unwrap();
        assert_eq!((count, buf), (1, vec![9]));
        let _ = task.await;
    }

    #[compio::test]
    async fn multiple_waiters_all_observe_the_transition() {
        let signal = Arc::new(CompletionSignal::new());
        let first = {
            let signal = Arc::clone(&signal);
            compio::runtime::spawn(async move { signal.wait().await })
        };
        let second = {
            let signal = Arc::clone(&signal);
            compio::runtime::spawn(async move { signal.wait().await })
        };

        signal.complete(Ok((0, Vec::new())));
        let _ = first.await;
        let _ = second.await;
        assert!(signal.is_complete());
    }
}
