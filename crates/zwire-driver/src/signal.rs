//! Single-slot, auto-resetting notification.
//!
//! A [`Signal`] remembers at most one pending notification. Setting it when
//! nothing waits leaves it pending, so the next [`wait`](Signal::wait)
//! completes at once and clears it. Repeated sets do not accumulate.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Returned by [`Signal::wait`] once the signal has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("signal closed")]
pub struct SignalClosed;

#[derive(Debug, Default)]
struct State {
    pending: bool,
    closed: bool,
}

/// Auto-reset event with cancellable waits.
#[derive(Debug, Default)]
pub struct Signal {
    state: Mutex<State>,
    notify: Notify,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal pending and wake a waiter if there is one.
    pub fn set(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.pending = true;
        }
        self.notify.notify_one();
    }

    /// Wait until the signal is set, consuming the pending notification.
    ///
    /// Cancel safe: dropping the future before it completes leaves a pending
    /// notification in place for the next waiter.
    pub async fn wait(&self) -> Result<(), SignalClosed> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent `set` cannot
            // slip between the check and the await.
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.pending {
                    state.pending = false;
                    return Ok(());
                }
                if state.closed {
                    return Err(SignalClosed);
                }
            }
            notified.await;
        }
    }

    /// Discard a pending notification, if any.
    pub fn reset(&self) {
        self.lock().pending = false;
    }

    /// Whether a notification is pending.
    pub fn is_set(&self) -> bool {
        self.lock().pending
    }

    /// Fail current and future waits. Further sets are ignored.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.pending = false;
        }
        self.notify.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
