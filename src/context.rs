//! Cancellation and deadlines for blocking reads.
//!
//! A [`Context`] bounds how long a cursor advance may block. Cancellation is
//! signalled by dropping the only sender of a zero-capacity channel, so every
//! clone of the context observes it at once and a blocked `select!` wakes up.

use crate::error::StreamError;
use crossbeam_channel::{bounded, never, Receiver, Sender};
use std::time::{Duration, Instant};

/// Cancellation scope for blocking operations.
#[derive(Clone, Debug)]
pub struct Context {
    deadline: Option<Instant>,
    done: Receiver<()>,
}

/// Cancels its [`Context`] when `cancel` is called or when dropped.
#[derive(Debug)]
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {}
}

impl Context {
    /// A context that never expires.
    pub fn background() -> Self {
        Self {
            deadline: None,
            done: never(),
        }
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            done: never(),
        }
    }

    /// A context that expires when the returned handle is cancelled or dropped.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = bounded(0);
        (
            Self {
                deadline: None,
                done: rx,
            },
            CancelHandle { _tx: tx },
        )
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Channel that becomes ready (disconnected) on cancellation.
    pub(crate) fn done(&self) -> &Receiver<()> {
        &self.done
    }

    /// Channel that fires at the deadline, or never.
    pub(crate) fn timer(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(deadline) => crossbeam_channel::at(deadline),
            None => never(),
        }
    }

    /// Non-blocking check for expiry.
    pub fn err(&self) -> Option<StreamError> {
        if self.is_cancelled() {
            return Some(StreamError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StreamError::DeadlineExceeded),
            _ => None,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(
            self.done.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_never_expires() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_reaches_clones() {
        let (ctx, handle) = Context::with_cancel();
        let clone = ctx.clone();
        assert!(clone.err().is_none());

        handle.cancel();
        assert_eq!(ctx.err(), Some(StreamError::Cancelled));
        assert_eq!(clone.err(), Some(StreamError::Cancelled));
    }

    #[test]
    fn test_drop_handle_cancels() {
        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        assert_eq!(ctx.err(), Some(StreamError::Cancelled));
    }

    #[test]
    fn test_deadline_exceeded() {
        let ctx = Context::with_deadline(Instant::now());
        assert_eq!(ctx.err(), Some(StreamError::DeadlineExceeded));

        let ctx = Context::with_timeout(Duration::from_secs(60));
        assert!(ctx.err().is_none());
    }
}
