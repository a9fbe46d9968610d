//! Process entry sequence.
//!
//! [`run`] drives one application from validation to the close hook:
//!
//! 1. route the lifecycle hooks to the application
//! 2. validate the configuration and prepare the application
//! 3. `start_all`, then detach when running in the background
//! 4. install the signal translator and spawn the periodic task on
//!    `process_executing`
//! 5. poll the lifecycle until it leaves `Running`
//! 6. cancel and join the task, then `close_all`

use std::sync::Arc;
use std::thread;
use tracing::{info, instrument, warn};

use crate::cancel::CancellationSource;
use crate::config::DaemonConfig;
use crate::console::{ConsoleCommand, ConsoleInput};
use crate::context::{step_fn, AppContext};
use crate::daemon::Daemon;
use crate::error::{Error, ErrorCode, Result};
use crate::event::WakeableEvent;
#[cfg(unix)]
use crate::signal::{SignalConfig, SignalTranslator};
use crate::state::State;
use crate::task::TaskController;

/// Run `app` under `daemon` until the lifecycle stops.
///
/// `console` is only read when `config.test_console` is set. If it reaches
/// end of input the loop falls back to sleeping.
///
/// # Errors
///
/// Returns a hook error when validation, preparation, start or close report
/// failure, the daemonization error when detaching fails, a signal
/// registration error, a spawn error for the task thread, or
/// `RuntimeAborted` after the close hook when the console aborted the run.
#[instrument(skip_all, fields(name = %config.name))]
pub fn run<A>(
    daemon: &Arc<Daemon>,
    app: &Arc<A>,
    config: &DaemonConfig,
    mut console: Option<Box<dyn ConsoleInput>>,
) -> Result<()>
where
    A: AppContext + 'static,
{
    daemon.attach(app);

    if app.validate_configuration(config).is_failure() {
        return Err(Error::hook("validate_configuration", "configuration mismatch"));
    }

    if app.process_start().is_failure() {
        return Err(Error::hook(
            "process_start",
            "preparing the application for the task start failed",
        ));
    }

    if daemon.start_all().is_failure() {
        return Err(Error::hook("start", "error starting the daemon"));
    }

    if config.background {
        let pid_file = config.pid_file.clone().unwrap_or_default();
        daemon.try_make_daemon(pid_file)?;
    }

    // Threads do not survive the detach, so the translator starts after it.
    #[cfg(unix)]
    let _signals = if config.handle_signals {
        Some(SignalTranslator::install(
            Arc::clone(daemon),
            &SignalConfig::default(),
        )?)
    } else {
        None
    };

    let event = Arc::new(WakeableEvent::new());
    let stop_source = CancellationSource::new();
    let mut task = TaskController::new(format!("{}-task", config.name));
    task.start(
        config.task.initial_wait(),
        config.task.zero_wait(),
        step_fn(Arc::clone(app)),
        stop_source.token(),
        Arc::clone(&event),
    )?;

    if !config.test_console {
        console = None;
    } else if console.is_some() {
        info!("Press the h key to display the console menu");
    }

    let mut aborted = false;
    while daemon.is_running() {
        let Some(input) = console.as_mut() else {
            thread::sleep(config.poll_interval());
            continue;
        };

        match input.next_command() {
            Ok(Some(ConsoleCommand::Restart)) => {
                if app.process_restart().is_failure() {
                    warn!("Restart failed, stopping");
                    daemon.set_state(State::Stop);
                } else {
                    ConsoleCommand::Restart.apply(daemon);
                }
            }
            Ok(Some(command)) => {
                aborted |= command == ConsoleCommand::Abort;
                command.apply(daemon);
            }
            Ok(None) => {
                warn!("Console input closed, continuing without the console");
                console = None;
            }
            Err(e) => {
                warn!(error = %e, "Console read failed, continuing without the console");
                console = None;
            }
        }
    }

    info!("The daemon process is stopping");
    stop_source.request_cancel();
    event.notify_all();
    info!("Waiting for the application task to complete");
    task.stop();

    if daemon.close_all().is_failure() {
        return Err(Error::hook("close", "error closing the daemon"));
    }

    if aborted {
        return Err(Error::runtime_with_code(
            ErrorCode::RuntimeAborted,
            "aborted from the test console",
        ));
    }

    info!("The daemon process ended successfully");
    Ok(())
}
