//! Demonstration daemon built on `daemon-lifecycle`.
//!
//! ```text
//! lifecycled -T -S /app/config
//! lifecycled -D -P /var/run/lifecycled.pid
//! lifecycled -D -x /app/config/settings.xml -P /var/run/lifecycled.pid
//! lifecycled -D -L /var/log/lifecycled.log
//! ```

use clap::Parser;
use daemon_lifecycle::console::StdinConsole;
use daemon_lifecycle::lock::InstanceLock;
use daemon_lifecycle::{
    init_logging, validate_path, AppContext, Daemon, DaemonConfig, HookResult, Result,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const RAMP_STEP: Duration = Duration::from_secs(1);
const RAMP_LIMIT: Duration = Duration::from_secs(4);

#[derive(Parser, Debug)]
#[command(name = "lifecycled", version, about = "Lifecycle demonstration daemon")]
struct Cli {
    /// Start as daemon
    #[arg(short = 'D', long, conflicts_with = "test")]
    background: bool,
    /// Start in foreground with test console
    #[arg(short = 'T', long)]
    test: bool,
    /// Create pid file
    #[arg(short = 'P', long = "pidfile", value_name = "FILE")]
    pid_file: Option<PathBuf>,
    /// Path to folder with configuration files
    #[arg(short = 'S', long = "cfgpath", value_name = "DIR")]
    config_folder: Option<PathBuf>,
    /// Specified configuration file
    #[arg(short = 'x', long = "cfgfile", value_name = "FILE")]
    config_file: Option<PathBuf>,
    /// Log file
    #[arg(short = 'L', long = "logfile", value_name = "FILE")]
    log_file: Option<PathBuf>,
    /// Daemon settings file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    settings: Option<PathBuf>,
}

impl Cli {
    fn apply(self, config: &mut DaemonConfig) {
        if self.background {
            config.background = true;
            config.test_console = false;
        }
        if self.test {
            config.background = false;
            config.test_console = true;
        }
        if self.pid_file.is_some() {
            config.pid_file = self.pid_file;
        }
        if self.config_folder.is_some() {
            config.config_folder = self.config_folder;
        }
        if self.config_file.is_some() {
            config.config_file = self.config_file;
        }
        if self.log_file.is_some() {
            config.logging.file = self.log_file;
        }
    }
}

/// Demo application: validates its paths and ramps its tick interval.
#[derive(Debug, Default)]
struct DemoApp {
    paths: Mutex<(Option<PathBuf>, Option<PathBuf>)>,
}

impl AppContext for DemoApp {
    fn validate_configuration(&self, config: &DaemonConfig) -> HookResult {
        info!("Validating the configuration");
        let folder = config.config_folder.clone().unwrap_or_default();
        let file = config.config_file.clone().unwrap_or_default();

        let mut errors = 0;
        for (path, description) in [(&folder, "Configuration Folder"), (&file, "Configuration File")] {
            if let Err(e) = validate_path(path, description, false) {
                error!(error = %e, "Invalid path");
                errors += 1;
            }
        }

        *self.paths.lock() = (config.config_folder.clone(), config.config_file.clone());
        HookResult::from(errors == 0)
    }

    fn process_start(&self) -> HookResult {
        info!("Application started");
        HookResult::Success
    }

    fn process_restart(&self) -> HookResult {
        info!("Application restarted");
        HookResult::Success
    }

    fn process_reconfigure(&self) -> HookResult {
        let (folder, file) = self.paths.lock().clone();
        info!(?folder, ?file, "Reconfiguring the application");
        HookResult::Success
    }

    fn process_shutdown(&self) -> HookResult {
        info!("Application shut down");
        HookResult::Success
    }

    fn process_user1(&self) -> HookResult {
        info!("User1 action");
        HookResult::Success
    }

    fn process_user2(&self) -> HookResult {
        info!("User2 action");
        HookResult::Success
    }

    fn process_executing(&self, min_duration: Duration) -> Duration {
        info!(ms = min_duration.as_millis(), "Application task ticks");
        if min_duration >= RAMP_LIMIT {
            RAMP_STEP
        } else {
            min_duration + RAMP_STEP
        }
    }
}

fn launch(cli: Cli) -> Result<()> {
    let mut config = match &cli.settings {
        Some(path) => DaemonConfig::load_from_file(path)?,
        None => DaemonConfig::load()?,
    };
    cli.apply(&mut config);

    init_logging(&config.logging)?;
    config.validate()?;
    info!(version = daemon_lifecycle::VERSION, name = %config.name, "Starting");

    let mut lock = config.pid_file.as_ref().map(InstanceLock::for_pid_file);
    if let Some(lock) = lock.as_mut() {
        lock.lock()?;
    }

    let daemon = Arc::new(Daemon::new());
    let app = Arc::new(DemoApp::default());
    let console: Option<Box<dyn daemon_lifecycle::console::ConsoleInput>> = if config.test_console {
        Some(Box::new(StdinConsole))
    } else {
        None
    };

    daemon_lifecycle::run(&daemon, &app, &config, console)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match launch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, category = e.category(), "Daemon failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
