//! Variable-interval periodic task driver.
//!
//! A [`TaskController`] runs a step function on its own thread. Each call
//! returns the wait before the next call, so backoff or acceleration policies
//! live entirely in the step function. The wait is interruptible through a
//! shared [`WakeableEvent`] and ends as soon as cancellation is requested.
//!
//! ```no_run
//! use daemon_lifecycle::{TaskController, WakeableEvent};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> daemon_lifecycle::Result<()> {
//! let event = Arc::new(WakeableEvent::new());
//! let mut task = TaskController::owned("poller");
//! task.start_owned(
//!     Duration::from_secs(1),
//!     Duration::from_millis(1),
//!     |wait: Duration| wait,
//!     event,
//! )?;
//! task.stop();
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cancel::{CancellationSource, CancellationToken};
use crate::error::{Error, ErrorCode, Result};
use crate::event::WakeableEvent;

/// Duration type a step function works in.
pub trait Interval: Copy + Send + Debug + 'static {
    /// Returns `true` when the value asks for a real wait.
    fn is_positive(&self) -> bool;

    /// Convert to a standard duration. Non-positive values map to zero.
    fn to_std(&self) -> Duration;
}

impl Interval for Duration {
    fn is_positive(&self) -> bool {
        !self.is_zero()
    }

    fn to_std(&self) -> Duration {
        *self
    }
}

/// Signed millisecond interval, for step functions that compute negative waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Millis(pub i64);

impl Interval for Millis {
    fn is_positive(&self) -> bool {
        self.0 > 0
    }

    fn to_std(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.0).unwrap_or(0))
    }
}

impl From<Duration> for Millis {
    fn from(value: Duration) -> Self {
        Self(i64::try_from(value.as_millis()).unwrap_or(i64::MAX))
    }
}

/// Clears the running flag when the loop exits, including by panic.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one periodic step function on a dedicated thread.
#[derive(Debug)]
pub struct TaskController<D: Interval> {
    name: String,
    handle: Option<JoinHandle<()>>,
    source: Option<CancellationSource>,
    running: Arc<AtomicBool>,
    iterations: Arc<AtomicU64>,
    _interval: PhantomData<fn(D) -> D>,
}

impl<D: Interval> TaskController<D> {
    /// Create a controller driven by an externally owned cancellation source.
    ///
    /// [`stop`](Self::stop) only joins; the owner must request cancellation
    /// and notify the event first.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            handle: None,
            source: None,
            running: Arc::new(AtomicBool::new(false)),
            iterations: Arc::new(AtomicU64::new(0)),
            _interval: PhantomData,
        }
    }

    /// Create a controller owning its cancellation source.
    pub fn owned<S: Into<String>>(name: S) -> Self {
        let mut controller = Self::new(name);
        controller.source = Some(CancellationSource::new());
        controller
    }

    /// Name given to the task thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` while the loop thread has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of completed step calls since the controller was created.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Spawn the loop.
    ///
    /// `initial` is passed to the first step call. Whenever a step returns a
    /// non-positive value the next call receives `zero` instead.
    ///
    /// # Errors
    ///
    /// Returns an error if a previous run has not been stopped, or if the
    /// thread cannot be spawned.
    pub fn start<F>(
        &mut self,
        initial: D,
        zero: D,
        step: F,
        token: CancellationToken,
        event: Arc<WakeableEvent>,
    ) -> Result<()>
    where
        F: FnMut(D) -> D + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(Error::invalid_state_with_current(
                format!("Task '{}' was started twice", self.name),
                "running",
            ));
        }

        self.running.store(true, Ordering::Release);
        let running = RunningGuard(Arc::clone(&self.running));
        let iterations = Arc::clone(&self.iterations);
        let name = self.name.clone();

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _running = running;
                info!(task = %name, ?initial, "Periodic task started");
                run_loop(initial, zero, step, &token, &event, &iterations);
                info!(task = %name, "Periodic task finished");
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                Err(Error::runtime_with_source(
                    ErrorCode::RuntimeSpawnError,
                    format!("Failed to spawn task thread '{}'", self.name),
                    err,
                ))
            }
        }
    }

    /// Spawn the loop using the controller's own cancellation source.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller was built with [`new`](Self::new),
    /// plus every error [`start`](Self::start) reports.
    pub fn start_owned<F>(&mut self, initial: D, zero: D, step: F, event: Arc<WakeableEvent>) -> Result<()>
    where
        F: FnMut(D) -> D + Send + 'static,
    {
        let token = match &mut self.source {
            Some(source) => {
                if source.is_cancelled() && self.handle.is_none() {
                    *source = CancellationSource::new();
                }
                source.token()
            }
            None => {
                return Err(Error::invalid_state(format!(
                    "Task '{}' has no cancellation source of its own",
                    self.name
                )))
            }
        };
        self.start(initial, zero, step, token, event)
    }

    /// Request cancellation if owned, then join the loop thread.
    ///
    /// A panic inside the step function is logged here and not re-raised.
    pub fn stop(&mut self) {
        if let Some(source) = &self.source {
            source.request_cancel();
        }

        let Some(handle) = self.handle.take() else {
            return;
        };

        debug!(task = %self.name, "Joining periodic task");
        if handle.join().is_err() {
            error!(task = %self.name, "Periodic task panicked inside its step function");
        }
    }
}

impl<D: Interval> Drop for TaskController<D> {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        if self.source.is_some() {
            self.stop();
        } else {
            warn!(task = %self.name, "Task controller dropped while its loop may still run");
        }
    }
}

fn run_loop<D, F>(
    initial: D,
    zero: D,
    mut step: F,
    token: &CancellationToken,
    event: &Arc<WakeableEvent>,
    iterations: &AtomicU64,
) where
    D: Interval,
    F: FnMut(D) -> D,
{
    // Held for the whole loop so a cancel interrupts any wait.
    let waker = Arc::clone(event);
    let _registration = token.on_cancel(move || waker.notify_all());

    let mut current = initial;
    loop {
        let next = step(current);
        iterations.fetch_add(1, Ordering::Relaxed);

        if next.is_positive() {
            event.wait_timeout_while(next.to_std(), || !token.is_cancelled());
            current = next;
        } else {
            if zero.is_positive() {
                event.wait_timeout_while(zero.to_std(), || !token.is_cancelled());
            } else {
                thread::yield_now();
            }
            current = zero;
        }

        if token.is_cancelled() {
            break;
        }
    }
}
