//! Wait/notify primitive used to interrupt a sleeping task early.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A mutex paired with a condition variable.
///
/// Shared by `Arc` between the thread that requests cancellation (or wants a
/// task to run early) and the task threads waiting on it. Notifications sent
/// while nobody waits are not remembered; waiters re-check their predicate
/// under the lock instead.
#[derive(Debug, Default)]
pub struct WakeableEvent {
    mutex: Mutex<()>,
    condition: Condvar,
}

impl WakeableEvent {
    /// Create a new event.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condition: Condvar::new(),
        }
    }

    /// Wake every thread currently waiting.
    pub fn notify_all(&self) {
        // Taking the lock orders the wake-up after any predicate check in progress.
        let _guard = self.mutex.lock();
        self.condition.notify_all();
    }

    /// Wake one thread currently waiting.
    pub fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.condition.notify_one();
    }

    /// Block for at most `timeout` while `keep_waiting` holds.
    ///
    /// The predicate is evaluated under the lock before blocking, so a
    /// notifier that changes the predicate's outcome and then calls
    /// [`notify_all`](Self::notify_all) can never be missed. Returns `true`
    /// if the full timeout elapsed, `false` if the wait ended early.
    pub fn wait_timeout_while<F>(&self, timeout: Duration, mut keep_waiting: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.mutex.lock();
        if !keep_waiting() {
            return false;
        }
        let deadline = Instant::now().checked_add(timeout);
        match deadline {
            Some(deadline) => self.condition.wait_until(&mut guard, deadline).timed_out(),
            None => {
                self.condition.wait(&mut guard);
                false
            }
        }
    }

    /// Block for at most `timeout` or until notified.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_timeout_while(timeout, || true)
    }
}
