//! Cancellation/deadline context threaded through blocking operations.
//!
//! A synchronous, thread-parking analogue of an async cancellation
//! token: `Cx` carries an optional deadline and a shared close-cause
//! flag so `Database::close` (in `tkv-core`) can propagate cancellation
//! to every parked waiter (§5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cause recorded when a context is cancelled out from under a parked
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// The owning database was closed.
    Closed,
    /// An explicit interrupt was requested (e.g. test harness teardown).
    Interrupted,
}

#[derive(Debug, Default)]
struct CxShared {
    cancelled: AtomicBool,
    cause: parking_lot::Mutex<Option<CancelCause>>,
}

/// A lightweight, cloneable cancellation/deadline context.
#[derive(Debug, Clone)]
pub struct Cx {
    deadline: Option<Instant>,
    shared: Arc<CxShared>,
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}

impl Cx {
    /// A context with no deadline and no cancellation source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            deadline: None,
            shared: Arc::new(CxShared::default()),
        }
    }

    /// A context that expires after `timeout` from now. A negative/absent
    /// timeout (per §8.2, `nanosTimeout < 0`) means "wait forever" and
    /// should be modeled by [`Cx::new`] instead of this constructor.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            shared: Arc::new(CxShared::default()),
        }
    }

    /// Derive a child context sharing this context's cancellation source
    /// but with its own (possibly tighter) deadline.
    #[must_use]
    pub fn with_child_timeout(&self, timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Remaining time before the deadline, or `None` if there is none.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline (if any) has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Mark this context's cancellation source (and every clone/child
    /// sharing it) as cancelled, recording `cause`.
    pub fn cancel(&self, cause: CancelCause) {
        *self.shared.cause.lock() = Some(cause);
        self.shared.cancelled.store(true, Ordering::Release);
    }

    /// Whether this context (or an ancestor) has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Acquire)
    }

    /// The recorded cancellation cause, if any.
    #[must_use]
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.shared.cause.lock().clone()
    }

    /// A checkpoint call for long-running loops (recovery replay,
    /// checkpoint flush): returns an error-shaped `Err(())` once cancelled
    /// so callers can bail without threading a full error type through
    /// every crate that depends on `tkv-types`.
    ///
    /// # Errors
    /// Returns `Err(())` once [`Cx::cancel`] has been called.
    pub fn checkpoint(&self) -> Result<(), ()> {
        if self.is_cancelled() { Err(()) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_no_deadline_and_is_live() {
        let cx = Cx::new();
        assert!(cx.remaining().is_none());
        assert!(!cx.is_expired());
        assert!(!cx.is_cancelled());
    }

    #[test]
    fn timeout_context_expires() {
        let cx = Cx::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cx.is_expired());
    }

    #[test]
    fn cancel_propagates_to_clones_and_children() {
        let cx = Cx::new();
        let clone = cx.clone();
        let child = cx.with_child_timeout(Duration::from_secs(10));
        cx.cancel(CancelCause::Closed);
        assert!(clone.is_cancelled());
        assert!(child.is_cancelled());
        assert_eq!(child.cancel_cause(), Some(CancelCause::Closed));
        assert!(cx.checkpoint().is_err());
    }
}
