//! Cooperative cancellation for periodic tasks.
//!
//! A [`CancellationSource`] owns the right to request cancellation. Any number
//! of [`CancellationToken`]s observe it. Tokens can register callbacks that run
//! once, on the thread requesting cancellation, which is how a sleeping task
//! gets woken instead of waiting out its full timeout.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// State shared by a source and its tokens.
struct CancelInner {
    /// Flag indicating cancellation has been requested
    cancelled: AtomicBool,
    /// Time when cancellation was requested
    cancelled_at: Mutex<Option<Instant>>,
    /// Registered callbacks keyed by registration id
    callbacks: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl CancelInner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            cancelled_at: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *self.cancelled_at.lock() = Some(Instant::now());

        // Run outside the lock so callbacks may touch the token again.
        let pending = std::mem::take(&mut *self.callbacks.lock());
        debug!(callbacks = pending.len(), "Cancellation requested");
        for (_, callback) in pending {
            callback();
        }
        true
    }

    fn deregister(&self, id: u64) {
        self.callbacks.lock().retain(|(registered, _)| *registered != id);
    }
}

impl fmt::Debug for CancelInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelInner")
            .field("cancelled", &self.is_cancelled())
            .field("callbacks", &self.callbacks.lock().len())
            .finish_non_exhaustive()
    }
}

/// Owner side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationSource {
    inner: Arc<CancelInner>,
}

impl CancellationSource {
    /// Create a source that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner::new()),
        }
    }

    /// Hand out a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Request cancellation and run every registered callback.
    ///
    /// Returns `true` only for the call that initiated cancellation.
    pub fn request_cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Time at which cancellation was requested.
    #[must_use]
    pub fn cancelled_at(&self) -> Option<Instant> {
        *self.inner.cancelled_at.lock()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

impl CancellationToken {
    /// Check if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Register `callback` to run when cancellation is requested.
    ///
    /// If cancellation already happened the callback runs immediately on the
    /// calling thread. Dropping the returned [`CancelCallback`] before
    /// cancellation deregisters it.
    #[must_use = "dropping the registration deregisters the callback"]
    pub fn on_cancel<F>(&self, callback: F) -> CancelCallback
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut callbacks = self.inner.callbacks.lock();
        if self.inner.is_cancelled() {
            drop(callbacks);
            callback();
        } else {
            callbacks.push((id, Box::new(callback)));
        }
        CancelCallback {
            inner: Arc::clone(&self.inner),
            id,
        }
    }
}

/// Registration handle returned by [`CancellationToken::on_cancel`].
#[derive(Debug)]
pub struct CancelCallback {
    inner: Arc<CancelInner>,
    id: u64,
}

impl Drop for CancelCallback {
    fn drop(&mut self) {
        self.inner.deregister(self.id);
    }
}
