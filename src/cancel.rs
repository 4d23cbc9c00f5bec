//! Cooperative cancellation.
//!
//! A [`CancelToken`] is cloned into every task spawned for a request. Holders
//! check [`CancelToken::is_cancelled`] at suspension points or race work
//! against [`CancelToken::cancelled`] with `tokio::select!`. Team delegation
//! detaches from its parent by creating a fresh token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation flag shared by all tasks of one request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a new, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token with no relation to any existing one.
    ///
    /// Used by team delegation, which detaches the parent deadline by design.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Cancel the token, waking all waiters.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check whether the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        // Register interest before the flag check to avoid a lost wakeup.
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Return `Err(Cancelled)` when the token has been cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!token.is_cancelled());
        token.cancel();

        let woke = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(woke);
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_after_cancel() {
        let token = CancelToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .unwrap();
        assert!(token.check().is_err());
    }

    #[test]
    fn detached_tokens_are_independent() {
        let parent = CancelToken::new();
        let detached = CancelToken::detached();
        parent.cancel();
        assert!(!detached.is_cancelled());
    }
}
