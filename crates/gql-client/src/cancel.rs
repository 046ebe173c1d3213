//! Cancellation handles shared between callers, transports and streams.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A cloneable cancellation signal.
///
/// All clones observe the same state. Cancellation is sticky: once
/// [`cancel`](Self::cancel) has been called the handle stays cancelled and
/// further calls do nothing.
///
/// # Example
///
/// ```ignore
/// let cancellation = CancellationHandle::new();
/// let stream = executor
///     .execute_subscription(&ON_TICK, &(), &RequestContext::default(), cancellation.clone())
///     .await?
///     .result;
///
/// // From anywhere else:
/// cancellation.cancel();
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    inner: Arc<CancellationState>,
}

#[derive(Debug, Default)]
struct CancellationState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationHandle {
    /// Create a new, uncancelled handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation and wake every waiter.
    ///
    /// Returns `true` if this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Wait until cancellation is requested.
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Drive `future` to completion unless the handle is cancelled first.
    ///
    /// Returns `None` on cancellation; the future is dropped, which aborts
    /// whatever work it owned.
    pub async fn run_until_cancelled<F: Future>(&self, future: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Whether two handles share the same state.
    pub fn same_as(&self, other: &CancellationHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
