//! Cooperative cancellation shared between a request's initiator and every
//! layer that observes it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::error::{Result, TransportError};

type Listener = Box<dyn FnOnce() + Send>;

/// A cancellation flag plus a registry of listeners.
///
/// Clones share the same cell. Cancelling is idempotent and irreversible;
/// a cancelled token never aborts an in-flight socket read by itself, it is
/// rechecked by every layer before suspending.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Listeners run once, on the first call only.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }

        let listeners = {
            let mut guard = self
                .inner
                .listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };

        tracing::debug!(listeners = listeners.len(), "cancel token triggered");

        for listener in listeners {
            listener();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`TransportError::Cancelled`] once the token is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register a callback fired on cancellation.
    ///
    /// Runs immediately (on the calling thread) if the token is already cancelled.
    pub fn on_cancel<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.is_cancelled() {
            drop(guard);
            listener();
        } else {
            guard.push(Box::new(listener));
        }
    }

    /// Wait until cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
