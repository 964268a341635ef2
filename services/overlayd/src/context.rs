//! Cancellable execution context.
//!
//! A [`Context`] carries a shutdown signal and an optional deadline. It is
//! passed down to every call that may block so the caller can tell
//! "shutdown in progress" ([`ContextError::Cancelled`]) apart from "took too
//! long" ([`ContextError::DeadlineExceeded`]).

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a context finished.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The context's deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancels the contexts created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every context derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Cancellation signal plus optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
    shutdown: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Context {
    /// Create a context and the handle that cancels it.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self::from_shutdown(rx), CancelHandle { tx })
    }

    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::from_shutdown(rx)
    }

    /// Wrap a shutdown channel; `true` means cancelled.
    pub fn from_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown,
            deadline: None,
        }
    }

    /// Derive a context that also expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            shutdown: self.shutdown.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derive a context that also expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is finished, or `None` while it is live.
    pub fn err(&self) -> Option<ContextError> {
        if *self.shutdown.borrow() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Returns true once the context is finished.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Wait until the context is finished.
    pub async fn done(&self) -> ContextError {
        let mut shutdown = self.shutdown.clone();
        let cancelled = async move {
            loop {
                if *shutdown.borrow_and_update() {
                    return;
                }
                if shutdown.changed().await.is_err() {
                    // sender gone without cancelling: never cancelled
                    std::future::pending::<()>().await;
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                ContextError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_done() {
        let (ctx, handle) = Context::new();
        assert_eq!(ctx.err(), None);

        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), ContextError::Cancelled);
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_millis(20));
        assert!(!ctx.is_done());

        assert_eq!(ctx.done().await, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_beats_deadline() {
        let (ctx, handle) = Context::new();
        let ctx = ctx.with_timeout(Duration::from_secs(60));
        handle.cancel();
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }

    #[tokio::test]
    async fn test_background_never_finishes() {
        let ctx = Context::background();
        let result = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_child_deadline_never_extends_parent() {
        let now = Instant::now();
        let parent = Context::background().with_deadline(now + Duration::from_secs(1));
        let child = parent.with_deadline(now + Duration::from_secs(10));
        assert_eq!(child.deadline(), Some(now + Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_dropped_handle_after_cancel() {
        let (ctx, handle) = Context::new();
        handle.cancel();
        drop(handle);
        assert_eq!(ctx.done().await, ContextError::Cancelled);
    }
}
