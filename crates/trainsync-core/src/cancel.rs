//! Cooperative cancellation for poll and sync passes.
//!
//! A pass checks the token between entities, so cancelling never leaves a
//! registry half-updated: the entity being written finishes its critical
//! section and the pass stops before the next one. Background loops can also
//! `await` [`CancellationToken::cancelled`] to wake up on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation token shared between a pass and whoever may stop it.
///
/// Clones observe the same state.
///
/// ```
/// use trainsync_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let shutdown = token.clone();
/// shutdown.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting in [`Self::cancelled`].
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
