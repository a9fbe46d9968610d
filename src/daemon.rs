//! Lifecycle controller.
//!
//! [`Daemon`] owns the process lifecycle [`State`], the five hook slots and
//! the one-shot detach-from-terminal step. It is constructed once by the
//! entry point and shared by `Arc` with the signal translator and any worker
//! that needs to observe the state.
//!
//! Hooks for `Reload`, `User1` and `User2` are not run where the transition is
//! requested. They run from [`Daemon::is_running`], which the main loop polls.

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, ErrorCode, Result};
use crate::signal::Interrupt;
use crate::state::{AtomicState, HookResult, State};

/// A lifecycle hook.
pub struct Hook(Box<dyn Fn() -> HookResult + Send + Sync + 'static>);

impl Hook {
    /// Wrap a closure.
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        Self(Box::new(hook))
    }

    /// Run the hook.
    pub fn call(&self) -> HookResult {
        (self.0)()
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Hook")
    }
}

/// Detaches the process from its controlling terminal.
pub trait Daemonizer: Send + Sync {
    /// Perform the detach.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be detached.
    fn detach(&self) -> Result<()>;
}

/// [`Daemonizer`] backed by `daemon(3)`.
///
/// Changes the working directory to `/` and keeps the standard streams open.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDaemonizer;

impl Daemonizer for SystemDaemonizer {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    fn detach(&self) -> Result<()> {
        nix::unistd::daemon(false, true).map_err(|errno| {
            Error::daemonize_with_source(
                ErrorCode::DaemonizeFailed,
                "Failed to detach from the controlling terminal",
                errno,
            )
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    fn detach(&self) -> Result<()> {
        Err(Error::platform(
            "Detaching from the terminal is not supported",
            std::env::consts::OS,
        ))
    }
}

/// Pid file written at daemonization time, removed on drop.
#[derive(Debug)]
struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    fn create(path: &Path, pid: u32) -> Result<Self> {
        let mut file = std::fs::File::create(path).map_err(|e| {
            Error::daemonize_with_source(
                ErrorCode::PidFileWrite,
                format!("Failed to create PID file at {}", path.display()),
                e,
            )
        })?;
        writeln!(file, "{pid}").map_err(|e| {
            Error::daemonize_with_source(
                ErrorCode::PidFileWrite,
                format!("Failed to write PID file at {}", path.display()),
                e,
            )
        })?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove PID file");
        }
    }
}

/// Lifecycle controller shared by the entry point, the signal translator and
/// the periodic tasks.
pub struct Daemon {
    state: AtomicState,
    start_hook: ArcSwapOption<Hook>,
    reload_hook: ArcSwapOption<Hook>,
    user1_hook: ArcSwapOption<Hook>,
    user2_hook: ArcSwapOption<Hook>,
    close_hook: ArcSwapOption<Hook>,
    daemonize_attempted: AtomicBool,
    daemonized: AtomicBool,
    /// 0 until daemonized
    pid: AtomicU32,
    pid_file: Mutex<Option<PidFileGuard>>,
    daemonizer: Box<dyn Daemonizer>,
    reloads: AtomicU64,
    user1_dispatches: AtomicU64,
    user2_dispatches: AtomicU64,
}

impl Daemon {
    /// Create a controller in the `Start` state using [`SystemDaemonizer`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_daemonizer(Box::new(SystemDaemonizer))
    }

    /// Create a controller with a custom detach strategy.
    #[must_use]
    pub fn with_daemonizer(daemonizer: Box<dyn Daemonizer>) -> Self {
        Self {
            state: AtomicState::new(State::Start),
            start_hook: ArcSwapOption::empty(),
            reload_hook: ArcSwapOption::empty(),
            user1_hook: ArcSwapOption::empty(),
            user2_hook: ArcSwapOption::empty(),
            close_hook: ArcSwapOption::empty(),
            daemonize_attempted: AtomicBool::new(false),
            daemonized: AtomicBool::new(false),
            pid: AtomicU32::new(0),
            pid_file: Mutex::new(None),
            daemonizer,
            reloads: AtomicU64::new(0),
            user1_dispatches: AtomicU64::new(0),
            user2_dispatches: AtomicU64::new(0),
        }
    }

    /// Install the hook run by [`start_all`](Self::start_all).
    pub fn set_start_hook<F>(&self, hook: F)
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.start_hook.store(Some(Arc::new(Hook::new(hook))));
    }

    /// Install the hook run when a pending `Reload` is polled.
    pub fn set_reload_hook<F>(&self, hook: F)
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.reload_hook.store(Some(Arc::new(Hook::new(hook))));
    }

    /// Install the hook run when a pending `User1` is polled.
    pub fn set_user1_hook<F>(&self, hook: F)
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.user1_hook.store(Some(Arc::new(Hook::new(hook))));
    }

    /// Install the hook run when a pending `User2` is polled.
    pub fn set_user2_hook<F>(&self, hook: F)
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.user2_hook.store(Some(Arc::new(Hook::new(hook))));
    }

    /// Install the hook run by [`close_all`](Self::close_all).
    pub fn set_close_hook<F>(&self, hook: F)
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.close_hook.store(Some(Arc::new(Hook::new(hook))));
    }

    /// Remove every hook.
    pub fn clear_hooks(&self) {
        for slot in [
            &self.start_hook,
            &self.reload_hook,
            &self.user1_hook,
            &self.user2_hook,
            &self.close_hook,
        ] {
            slot.store(None);
        }
    }

    /// Enter `Running` and run the start hook.
    pub fn start_all(&self) -> HookResult {
        self.state.store(State::Running);
        let result = Self::dispatch(&self.start_hook);
        info!(%result, "Lifecycle started");
        result
    }

    /// Enter `Stop` and run the close hook.
    pub fn close_all(&self) -> HookResult {
        self.state.store(State::Stop);
        let result = Self::dispatch(&self.close_hook);
        info!(%result, "Lifecycle closed");
        result
    }

    /// Request a reload. The reload hook runs on the next poll.
    ///
    /// Always returns [`HookResult::NotApplicable`].
    pub fn reload_all(&self) -> HookResult {
        self.state.store(State::Reload);
        debug!("Reload requested");
        HookResult::NotApplicable
    }

    /// Poll the lifecycle.
    ///
    /// A pending `Reload`, `User1` or `User2` is switched back to `Running`
    /// and its hook runs once. A failing hook forces `Stop`. Returns `true`
    /// if the state is `Running` afterwards.
    pub fn is_running(&self) -> bool {
        let observed = self.state.load();
        if observed.is_pending_dispatch()
            && self.state.compare_exchange(observed, State::Running).is_ok()
        {
            let (slot, counter) = match observed {
                State::Reload => (&self.reload_hook, &self.reloads),
                State::User1 => (&self.user1_hook, &self.user1_dispatches),
                _ => (&self.user2_hook, &self.user2_dispatches),
            };
            counter.fetch_add(1, Ordering::Relaxed);

            let result = Self::dispatch(slot);
            debug!(pending = %observed, %result, "Dispatched deferred hook");
            if result.is_failure() {
                warn!(pending = %observed, "Hook failed, stopping");
                self.state.store(State::Stop);
            }
        }
        self.state.load() == State::Running
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state.load()
    }

    /// Overwrite the state without running any hook.
    pub fn set_state(&self, state: State) {
        self.state.store(state);
    }

    /// Apply an interrupt. Only stores the mapped state.
    ///
    /// Once the lifecycle is in `Stop`, interrupts cannot move it out again.
    /// [`set_state`](Self::set_state) still can.
    pub fn deliver(&self, interrupt: Interrupt) {
        if self.state.store_unless_terminal(interrupt.target_state()).is_err() {
            debug!(%interrupt, "Lifecycle already stopped, interrupt ignored");
        }
    }

    /// Detach from the terminal and write the pid file.
    ///
    /// Only the first call does anything; it returns `false` on failure and
    /// every later call returns `false` as well. An empty `pid_file` skips the
    /// file.
    pub fn make_daemon<P: AsRef<Path>>(&self, pid_file: P) -> bool {
        match self.try_make_daemon(pid_file) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Daemonization failed");
                false
            }
        }
    }

    /// [`make_daemon`](Self::make_daemon) with the failure reason.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyDaemonized` on any call after the first, the detach
    /// error, or `PidFileWrite` if the pid file cannot be written.
    pub fn try_make_daemon<P: AsRef<Path>>(&self, pid_file: P) -> Result<()> {
        if self.daemonize_attempted.swap(true, Ordering::AcqRel) {
            return Err(Error::daemonize(
                ErrorCode::AlreadyDaemonized,
                "Daemonization was already attempted",
            ));
        }

        // Resolved before detaching, which changes the working directory.
        let path = pid_file.as_ref();
        let path = if path.as_os_str().is_empty() {
            None
        } else {
            Some(std::path::absolute(path).map_err(|e| {
                Error::daemonize_with_source(
                    ErrorCode::PidFileWrite,
                    format!("Failed to resolve PID file path {}", path.display()),
                    e,
                )
            })?)
        };

        self.daemonizer.detach()?;

        let pid = std::process::id();
        if let Some(path) = &path {
            let guard = PidFileGuard::create(path, pid)?;
            *self.pid_file.lock() = Some(guard);
        }
        self.pid.store(pid, Ordering::Release);
        self.daemonized.store(true, Ordering::Release);

        info!(pid, pid_file = ?path, "Process daemonized");
        Ok(())
    }

    /// Returns `true` once the process has been detached and its pid file
    /// written.
    #[must_use]
    pub fn is_daemonized(&self) -> bool {
        self.daemonized.load(Ordering::Acquire)
    }

    /// Process id recorded at daemonization.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Pid file written at daemonization.
    #[must_use]
    pub fn pid_file(&self) -> Option<PathBuf> {
        self.pid_file.lock().as_ref().map(|guard| guard.path.clone())
    }

    /// Snapshot of the controller.
    #[must_use]
    pub fn stats(&self) -> DaemonStats {
        DaemonStats {
            state: self.state(),
            daemonized: self.is_daemonized(),
            pid: self.pid(),
            pid_file: self.pid_file(),
            reloads: self.reloads.load(Ordering::Relaxed),
            user1_dispatches: self.user1_dispatches.load(Ordering::Relaxed),
            user2_dispatches: self.user2_dispatches.load(Ordering::Relaxed),
        }
    }

    fn dispatch(slot: &ArcSwapOption<Hook>) -> HookResult {
        slot.load_full()
            .map_or(HookResult::NotApplicable, |hook| hook.call())
    }
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("state", &self.state())
            .field("daemonized", &self.is_daemonized())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

/// Statistics about the controller's current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStats {
    /// Current lifecycle state
    pub state: State,
    /// Whether the process was detached
    pub daemonized: bool,
    /// Process id recorded at daemonization
    pub pid: Option<u32>,
    /// Pid file written at daemonization
    pub pid_file: Option<PathBuf>,
    /// Reload hooks dispatched
    pub reloads: u64,
    /// User1 hooks dispatched
    pub user1_dispatches: u64,
    /// User2 hooks dispatched
    pub user2_dispatches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[derive(Default)]
    struct FakeDaemonizer {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Daemonizer for FakeDaemonizer {
        fn detach(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::daemonize(ErrorCode::DaemonizeFailed, "refused"))
            } else {
                Ok(())
            }
        }
    }

    fn counting_hook(result: HookResult) -> (Arc<AtomicUsize>, impl Fn() -> HookResult) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        (hits, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            result
        })
    }

    #[test]
    fn test_start_sets_state_before_hook() {
        let daemon = Arc::new(Daemon::with_daemonizer(Box::new(FakeDaemonizer::default())));
        let seen = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&daemon);
        let record = Arc::clone(&seen);
        daemon.set_start_hook(move || {
            *record.lock() = weak.upgrade().map(|d| d.state());
            HookResult::Success
        });

        assert_eq!(daemon.start_all(), HookResult::Success);
        assert_eq!(*seen.lock(), Some(State::Running));
    }

    #[test]
    fn test_hooks_return_their_own_result() {
        let daemon = Daemon::new();
        assert_eq!(daemon.start_all(), HookResult::NotApplicable);
        assert_eq!(daemon.close_all(), HookResult::NotApplicable);

        daemon.set_start_hook(|| HookResult::Failure);
        daemon.set_close_hook(|| HookResult::Success);
        assert_eq!(daemon.start_all(), HookResult::Failure);
        assert_eq!(daemon.close_all(), HookResult::Success);
        assert_eq!(daemon.state(), State::Stop);
    }

    #[test]
    fn test_reload_all_defers_hook_to_poll() {
        let daemon = Daemon::new();
        let (hits, hook) = counting_hook(HookResult::Success);
        daemon.set_reload_hook(hook);
        daemon.start_all();

        assert_eq!(daemon.reload_all(), HookResult::NotApplicable);
        assert_eq!(daemon.state(), State::Reload);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(daemon.is_running());
        assert!(daemon.is_running());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.stats().reloads, 1);
    }

    #[test]
    fn test_failing_user_hook_forces_stop() {
        let daemon = Daemon::new();
        daemon.set_user2_hook(|| HookResult::Failure);
        daemon.start_all();

        daemon.deliver(Interrupt::User2);
        assert!(!daemon.is_running());
        assert_eq!(daemon.state(), State::Stop);
    }

    #[test]
    fn test_missing_hook_keeps_running() {
        let daemon = Daemon::new();
        daemon.start_all();
        daemon.deliver(Interrupt::User1);
        assert!(daemon.is_running());
        assert_eq!(daemon.stats().user1_dispatches, 1);
    }

    #[test]
    fn test_interrupts_map_to_states() {
        let daemon = Daemon::new();
        for (interrupt, expected) in [
            (Interrupt::Exit, State::Stop),
            (Interrupt::Terminate, State::Stop),
            (Interrupt::Reload, State::Reload),
            (Interrupt::User1, State::User1),
            (Interrupt::User2, State::User2),
        ] {
            daemon.set_state(State::Running);
            daemon.deliver(interrupt);
            assert_eq!(daemon.state(), expected);
        }
    }

    #[test]
    fn test_concurrent_polls_dispatch_once() {
        let daemon = Arc::new(Daemon::new());
        let (hits, hook) = counting_hook(HookResult::Success);
        daemon.set_user1_hook(hook);
        daemon.start_all();
        daemon.deliver(Interrupt::User1);

        let pollers: Vec<_> = (0..8)
            .map(|_| {
                let daemon = Arc::clone(&daemon);
                thread::spawn(move || daemon.is_running())
            })
            .collect();
        for poller in pollers {
            poller.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(daemon.state(), State::Running);
    }

    #[test]
    fn test_make_daemon_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("test.pid");
        let fake = FakeDaemonizer::default();
        let calls = Arc::clone(&fake.calls);
        let daemon = Daemon::with_daemonizer(Box::new(fake));

        assert!(daemon.make_daemon(&pid_path));
        assert!(daemon.is_daemonized());
        assert_eq!(daemon.pid(), Some(std::process::id()));
        assert_eq!(daemon.pid_file(), Some(pid_path.clone()));
        let contents = std::fs::read_to_string(&pid_path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        assert!(!daemon.make_daemon(dir.path().join("other.pid")));
        assert!(!dir.path().join("other.pid").exists());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(daemon);
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_make_daemon_with_empty_path() {
        let daemon = Daemon::with_daemonizer(Box::new(FakeDaemonizer::default()));
        assert!(daemon.make_daemon(""));
        assert!(daemon.pid_file().is_none());
    }

    #[test]
    fn test_failed_detach_consumes_attempt() {
        let fake = FakeDaemonizer {
            fail: true,
            ..FakeDaemonizer::default()
        };
        let daemon = Daemon::with_daemonizer(Box::new(fake));
        assert!(!daemon.make_daemon(""));
        assert!(!daemon.is_daemonized());

        let err = daemon.try_make_daemon("").unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyDaemonized);
    }

    #[test]
    fn test_unwritable_pid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::with_daemonizer(Box::new(FakeDaemonizer::default()));
        let err = daemon
            .try_make_daemon(dir.path().join("missing").join("test.pid"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PidFileWrite);
        assert_eq!(daemon.pid(), None);
        assert!(!daemon.is_daemonized());
        assert!(daemon.pid_file().is_none());
        assert_eq!(daemon.stats().pid, None);
    }

    #[test]
    fn test_interrupts_cannot_leave_stop() {
        let daemon = Daemon::new();
        let (hits, hook) = counting_hook(HookResult::Success);
        daemon.set_reload_hook(hook);
        daemon.start_all();

        daemon.deliver(Interrupt::Terminate);
        daemon.deliver(Interrupt::Reload);
        daemon.deliver(Interrupt::User1);
        assert_eq!(daemon.state(), State::Stop);
        assert!(!daemon.is_running());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        daemon.deliver(Interrupt::Exit);
        assert_eq!(daemon.state(), State::Stop);

        // The console override still works.
        daemon.set_state(State::Reload);
        assert!(daemon.is_running());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    /// Moves the process into another directory, like `daemon(3)` does.
    struct ChdirDaemonizer(PathBuf);

    impl Daemonizer for ChdirDaemonizer {
        fn detach(&self) -> Result<()> {
            std::env::set_current_dir(&self.0)?;
            Ok(())
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_relative_pid_file_resolved_before_detach() {
        let launch_dir = tempfile::tempdir().unwrap();
        let detached_dir = tempfile::tempdir().unwrap();
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(launch_dir.path()).unwrap();

        let daemon =
            Daemon::with_daemonizer(Box::new(ChdirDaemonizer(detached_dir.path().to_path_buf())));
        let result = daemon.try_make_daemon("relative.pid");
        std::env::set_current_dir(&original).unwrap();

        result.unwrap();
        let expected = launch_dir.path().join("relative.pid");
        assert!(expected.exists());
        assert!(!detached_dir.path().join("relative.pid").exists());
        assert!(daemon.pid_file().is_some_and(|path| path.is_absolute()));

        drop(daemon);
        assert!(!expected.exists());
    }
}
