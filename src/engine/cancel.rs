//! Cooperative cancellation shared by the aggregator and every source.
//!
//! Built on a `tokio::sync::watch` channel carrying a single `bool`:
//! once flipped to `true` it never flips back, and every clone of the
//! token observes it.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable, one-shot cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Raise the signal. Calling it again has no further effect.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has been raised.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let raised = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if raised.is_err() {
            // Sender is owned by `self`; never report a false cancel.
            std::future::pending::<()>().await;
        }
    }

    /// A token that fires when `self` fires, or when cancelled directly.
    /// Cancelling the child leaves the parent untouched.
    ///
    /// The link to the parent lives until either token fires or every
    /// clone of the child is dropped. Must be called from within a Tokio
    /// runtime.
    pub fn child(&self) -> CancelToken {
        let child = CancelToken::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }

        let parent = self.clone();
        // Only weak hold on the child, so dropping it ends the link.
        let target = Arc::downgrade(&child.tx);
        let mut child_rx = child.rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => {
                    if let Some(tx) = target.upgrade() {
                        tx.send_replace(true);
                    }
                }
                // Resolves on cancel, or errors once the child's sender is gone.
                _ = child_rx.wait_for(|cancelled| *cancelled) => {}
            }
        });
        child
    }

    /// Cancel this token when the returned guard is dropped.
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels the wrapped token on drop.
#[derive(Debug)]
pub struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}
