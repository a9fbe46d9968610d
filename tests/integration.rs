//! Integration tests for daemon-lifecycle.

use daemon_lifecycle::console::ReaderConsole;
use daemon_lifecycle::{
    run, AppContext, CancellationSource, Daemon, DaemonConfig, ErrorCode, HookResult, Interrupt,
    SignalConfig, SignalTranslator, State, TaskController, WakeableEvent,
};
use parking_lot::Mutex;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Journal {
    calls: Mutex<Vec<&'static str>>,
    ticks: AtomicUsize,
    reject_config: bool,
}

impl Journal {
    fn rejecting() -> Self {
        Self {
            reject_config: true,
            ..Self::default()
        }
    }

    fn record(&self, call: &'static str) -> HookResult {
        self.calls.lock().push(call);
        HookResult::Success
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }
}

impl AppContext for Journal {
    fn validate_configuration(&self, _config: &DaemonConfig) -> HookResult {
        self.calls.lock().push("validate");
        HookResult::from(!self.reject_config)
    }

    fn process_start(&self) -> HookResult {
        self.record("start")
    }

    fn process_restart(&self) -> HookResult {
        self.record("restart")
    }

    fn process_reconfigure(&self) -> HookResult {
        self.record("reconfigure")
    }

    fn process_shutdown(&self) -> HookResult {
        self.record("shutdown")
    }

    fn process_user1(&self) -> HookResult {
        self.record("user1")
    }

    fn process_executing(&self, min_duration: Duration) -> Duration {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        min_duration
    }
}

fn test_config() -> DaemonConfig {
    DaemonConfig::builder()
        .name("itest")
        .handle_signals(false)
        .poll_interval(Duration::from_millis(5))
        .unwrap()
        .initial_wait(Duration::from_millis(5))
        .unwrap()
        .build()
        .unwrap()
}

fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_run_full_sequence() {
    let daemon = Arc::new(Daemon::new());
    let app = Arc::new(Journal::default());
    let config = test_config();

    let runner = {
        let daemon = Arc::clone(&daemon);
        let app = Arc::clone(&app);
        thread::spawn(move || run(&daemon, &app, &config, None))
    };

    assert!(wait_until(|| app.ticks.load(Ordering::SeqCst) >= 2));
    daemon.deliver(Interrupt::User1);
    assert!(wait_until(|| app.count("user1") == 1));
    daemon.deliver(Interrupt::Terminate);

    runner.join().unwrap().unwrap();
    assert_eq!(
        app.calls(),
        vec!["validate", "start", "start", "user1", "shutdown"]
    );
    assert_eq!(daemon.state(), State::Stop);
}

#[test]
fn test_run_rejects_invalid_configuration() {
    let daemon = Arc::new(Daemon::new());
    let app = Arc::new(Journal::rejecting());

    let err = run(&daemon, &app, &test_config(), None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::HookFailed);
    assert_eq!(app.calls(), vec!["validate"]);
    assert_eq!(daemon.state(), State::Start);
}

#[test]
fn test_console_drives_lifecycle() {
    let daemon = Arc::new(Daemon::new());
    let app = Arc::new(Journal::default());
    let mut config = test_config();
    config.test_console = true;

    let console = Box::new(ReaderConsole::new(&b"r\nRq"[..]));
    run(&daemon, &app, &config, Some(console)).unwrap();

    assert_eq!(app.count("reconfigure"), 2);
    assert_eq!(app.count("restart"), 1);
    assert_eq!(app.count("shutdown"), 1);
}

#[test]
fn test_console_abort_closes_then_reports() {
    let daemon = Arc::new(Daemon::new());
    let app = Arc::new(Journal::default());
    let mut config = test_config();
    config.test_console = true;

    let console = Box::new(ReaderConsole::new(&b"a"[..]));
    let err = run(&daemon, &app, &config, Some(console)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RuntimeAborted);
    assert_eq!(app.count("shutdown"), 1);
    assert_eq!(daemon.state(), State::Stop);
}

#[test]
fn test_notify_wakes_task_early() {
    let event = Arc::new(WakeableEvent::new());
    let source = CancellationSource::new();
    let steps = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&steps);

    let mut task = TaskController::new("early-wake");
    task.start(
        Duration::from_secs(30),
        Duration::from_millis(1),
        move |wait: Duration| {
            counter.fetch_add(1, Ordering::SeqCst);
            wait
        },
        source.token(),
        Arc::clone(&event),
    )
    .unwrap();

    assert!(wait_until(|| steps.load(Ordering::SeqCst) == 1));
    event.notify_all();
    assert!(wait_until(|| steps.load(Ordering::SeqCst) == 2));

    let start = Instant::now();
    source.request_cancel();
    task.stop();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
#[serial]
fn test_real_signals_change_state() {
    use signal_hook::consts::{SIGHUP, SIGUSR1, SIGUSR2};
    use signal_hook::low_level::raise;

    let daemon = Arc::new(Daemon::new());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    daemon.set_user1_hook(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        HookResult::Success
    });
    daemon.start_all();

    let config = SignalConfig::none()
        .with(Interrupt::Reload)
        .with(Interrupt::User1)
        .with(Interrupt::User2);
    let mut translator = SignalTranslator::install(Arc::clone(&daemon), &config).unwrap();

    raise(SIGUSR1).unwrap();
    assert!(wait_until(|| daemon.state() == State::User1));
    assert!(daemon.is_running());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    raise(SIGHUP).unwrap();
    assert!(wait_until(|| daemon.state() == State::Reload));
    assert!(daemon.is_running());

    raise(SIGUSR2).unwrap();
    assert!(wait_until(|| daemon.state() == State::User2));

    translator.stop();
}

#[test]
#[serial]
fn test_run_stops_on_sigterm() {
    use signal_hook::consts::SIGTERM;

    let daemon = Arc::new(Daemon::new());
    let app = Arc::new(Journal::default());
    let mut config = test_config();
    config.handle_signals = true;

    let runner = {
        let daemon = Arc::clone(&daemon);
        let app = Arc::clone(&app);
        thread::spawn(move || run(&daemon, &app, &config, None))
    };

    // The first tick happens after the translator is installed.
    assert!(wait_until(|| app.ticks.load(Ordering::SeqCst) >= 1));
    signal_hook::low_level::raise(SIGTERM).unwrap();

    runner.join().unwrap().unwrap();
    assert_eq!(app.count("shutdown"), 1);
}
