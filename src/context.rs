//! # Call Context
//!
//! Deadline and cancellation carried by a single `Scheduler::submit` call.
//!
//! A `CallContext` bundles an optional absolute deadline with an optional
//! cancellation signal. Waiting code races its timer against `done()` so
//! that a cancelled caller is released immediately instead of sleeping out
//! a rate-limit reset.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation signal for one call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every `CallContext` created from the same `cancellable()` pair
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even when every receiver is gone
        self.tx.send_replace(true);
    }
}

impl CallContext {
    /// A context with no deadline that is never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    /// A cancellable context plus the handle that cancels it
    pub fn cancellable() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    /// Set an absolute deadline, keeping the earlier one if already set
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Set a deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the cancel handle has fired
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// True when the call is cancelled or its deadline has passed
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Whether `now + wait` would run past the deadline
    pub fn would_exceed(&self, wait: Duration) -> bool {
        self.deadline
            .is_some_and(|d| Instant::now().checked_add(wait).is_none_or(|end| end > d))
    }

    /// Resolves when the call is cancelled or the deadline is reached.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    // A dropped handle can no longer cancel anything
                    if closed {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = deadline => {}
            _ = cancelled => {}
        }
    }

    /// Sleep for `wait` unless the context finishes first.
    ///
    /// Returns `false` when the sleep was cut short.
    pub async fn sleep(&self, wait: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(wait) => !self.is_cancelled(),
            _ = self.done() => false,
        }
    }
}
