//! Configuration for the daemon runtime.
//!
//! Settings are layered with figment, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (when it exists)
//! 3. `LIFECYCLED_`-prefixed environment variables, nested keys separated by
//!    `__` (for example `LIFECYCLED_TASK__INITIAL_WAIT_MS=500`)
//!
//! Command-line flags are applied on top by the binary.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, ErrorCode, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "LIFECYCLED_";

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level logging (most verbose)
    Trace,
    /// Debug level logging
    Debug,
    /// Info level logging (default)
    #[default]
    Info,
    /// Warning level logging
    Warn,
    /// Error level logging
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Logging level
    pub level: LogLevel,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Enable colored output (ignored for JSON logs)
    pub color: bool,
    /// Log file path; stdout when unset
    pub file: Option<PathBuf>,
    /// Maximum log file size in bytes before rotation
    pub max_file_size: Option<u64>,
    /// Number of rotated log files to keep
    pub max_files: Option<u32>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json: false,
            color: true,
            file: None,
            max_file_size: Some(10 * 1024 * 1024), // 10MB
            max_files: Some(5),
        }
    }
}

impl LogConfig {
    /// Check if colored logging is enabled.
    #[must_use]
    pub const fn is_colored(&self) -> bool {
        self.color && !self.json
    }
}

/// Periodic task timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Wait handed to the first step call, in milliseconds
    pub initial_wait_ms: u64,
    /// Wait handed to the step after it returned a non-positive wait
    pub zero_wait_ms: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            initial_wait_ms: 1000,
            zero_wait_ms: 1,
        }
    }
}

impl TaskConfig {
    /// Initial wait as a Duration.
    #[must_use]
    pub const fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }

    /// Zero wait as a Duration.
    #[must_use]
    pub const fn zero_wait(&self) -> Duration {
        Duration::from_millis(self.zero_wait_ms)
    }
}

/// Main daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon name, used in log lines and the task thread name
    pub name: String,
    /// Detach from the terminal after startup
    pub background: bool,
    /// Read single-key commands from stdin instead of sleeping in the main loop
    pub test_console: bool,
    /// Where to write the process id once detached
    pub pid_file: Option<PathBuf>,
    /// Application configuration file
    pub config_file: Option<PathBuf>,
    /// Application configuration folder
    pub config_folder: Option<PathBuf>,
    /// Translate OS signals into lifecycle states while running
    pub handle_signals: bool,
    /// Main loop sleep between lifecycle polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Periodic task timing
    pub task: TaskConfig,
    /// Logging configuration
    pub logging: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: String::from("lifecycled"),
            background: false,
            test_console: false,
            pid_file: None,
            config_file: None,
            config_folder: None,
            handle_signals: true,
            poll_interval_ms: 1000,
            task: TaskConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default file location and the environment.
    ///
    /// # Errors
    ///
    /// Will return an error if a source contains invalid configuration data.
    pub fn load() -> Result<Self> {
        Self::load_from_file(crate::DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from `path` (skipped if missing) and the environment.
    ///
    /// # Errors
    ///
    /// Will return an error if the file cannot be parsed or a value has the
    /// wrong type.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            warn!(path = %path.display(), "Configuration file not found, using defaults");
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Error::from)
    }

    /// Load configuration from defaults overlaid with `provider`.
    ///
    /// # Errors
    ///
    /// Will return an error if the provider yields invalid configuration data.
    pub fn load_with_provider<P: Provider>(provider: P) -> Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(provider)
            .extract()
            .map_err(Error::from)
    }

    /// Main loop poll interval as a Duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if any value is out of range or a referenced
    /// directory does not exist.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::config("Daemon name cannot be empty"));
        }

        if self.poll_interval_ms == 0 {
            return Err(Error::config("Poll interval must be greater than 0"));
        }

        if self.background && self.test_console {
            return Err(Error::config(
                "The test console needs a terminal and cannot run in the background",
            ));
        }

        if let Some(pid_file) = &self.pid_file {
            check_parent_exists(pid_file, "PID file")?;
        }

        if let Some(log_file) = &self.logging.file {
            check_parent_exists(log_file, "Log file")?;
        }

        Ok(())
    }

    /// Create a builder for this configuration.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

fn check_parent_exists(path: &Path, description: &str) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            Err(Error::config(format!(
                "{description} directory does not exist: {}",
                parent.display()
            )))
        }
        _ => Ok(()),
    }
}

/// Check an application path.
///
/// An empty path passes unless `mandatory` is set. A non-empty path must
/// exist.
///
/// # Errors
///
/// Returns a `ConfigMissing` error when a mandatory path is empty and a
/// `FileNotFound` error when the path does not exist.
pub fn validate_path<P: AsRef<Path>>(path: P, description: &str, mandatory: bool) -> Result<()> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        if mandatory {
            return Err(Error::config_with_code(
                ErrorCode::ConfigMissing,
                format!("{description} is mandatory but not defined"),
            ));
        }
        return Ok(());
    }

    if !path.exists() {
        return Err(Error::config_with_code(
            ErrorCode::FileNotFound,
            format!("{description} \"{}\" doesn't exist", path.display()),
        ));
    }
    Ok(())
}

/// Builder for creating configurations programmatically.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: DaemonConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    #[must_use]
    pub const fn from_config(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Set the daemon name.
    #[must_use]
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.name = name.into();
        self
    }

    /// Detach from the terminal after startup.
    #[must_use]
    pub const fn background(mut self, enabled: bool) -> Self {
        self.config.background = enabled;
        self
    }

    /// Read console commands in the main loop.
    #[must_use]
    pub const fn test_console(mut self, enabled: bool) -> Self {
        self.config.test_console = enabled;
        self
    }

    /// Set the PID file location.
    #[must_use]
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.pid_file = Some(path.into());
        self
    }

    /// Set the application configuration file.
    #[must_use]
    pub fn config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.config_file = Some(path.into());
        self
    }

    /// Set the application configuration folder.
    #[must_use]
    pub fn config_folder<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.config_folder = Some(path.into());
        self
    }

    /// Install the signal translator while running.
    #[must_use]
    pub const fn handle_signals(mut self, enabled: bool) -> Self {
        self.config.handle_signals = enabled;
        self
    }

    /// Set the main loop poll interval.
    ///
    /// # Errors
    ///
    /// Will return an error if the duration exceeds `u64::MAX` milliseconds
    pub fn poll_interval(mut self, interval: Duration) -> Result<Self> {
        self.config.poll_interval_ms = u64::try_from(interval.as_millis())
            .map_err(|_| Error::config("Poll interval too large"))?;
        Ok(self)
    }

    /// Set the wait handed to the first step call.
    ///
    /// # Errors
    ///
    /// Will return an error if the duration exceeds `u64::MAX` milliseconds
    pub fn initial_wait(mut self, wait: Duration) -> Result<Self> {
        self.config.task.initial_wait_ms = u64::try_from(wait.as_millis())
            .map_err(|_| Error::config("Initial wait too large"))?;
        Ok(self)
    }

    /// Set the wait used after a non-positive step result.
    ///
    /// # Errors
    ///
    /// Will return an error if the duration exceeds `u64::MAX` milliseconds
    pub fn zero_wait(mut self, wait: Duration) -> Result<Self> {
        self.config.task.zero_wait_ms = u64::try_from(wait.as_millis())
            .map_err(|_| Error::config("Zero wait too large"))?;
        Ok(self)
    }

    /// Set the log level.
    #[must_use]
    pub const fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Enable JSON logging.
    #[must_use]
    pub const fn json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    /// Log to a file instead of stdout.
    #[must_use]
    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.logging.file = Some(path.into());
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if validation fails.
    pub fn build(self) -> Result<DaemonConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.name, "lifecycled");
        assert!(!config.background);
        assert!(config.handle_signals);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.task.initial_wait(), Duration::from_secs(1));
        assert_eq!(config.task.zero_wait(), Duration::from_millis(1));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::builder()
            .name("test-daemon")
            .pid_file(dir.path().join("test.pid"))
            .log_level(LogLevel::Debug)
            .poll_interval(Duration::from_millis(250))
            .unwrap()
            .initial_wait(Duration::from_millis(50))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(config.name, "test-daemon");
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.task.initial_wait_ms, 50);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DaemonConfig::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        config.poll_interval_ms = 10;
        config.background = true;
        config.test_console = true;
        assert!(config.validate().is_err());

        config.test_console = false;
        config.pid_file = Some(PathBuf::from("/definitely/not/here/daemon.pid"));
        assert!(config.validate().is_err());

        config.pid_file = Some(PathBuf::from("daemon.pid"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifecycled.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "name = \"from-file\"\npoll_interval_ms = 20\n\n[task]\ninitial_wait_ms = 7\nzero_wait_ms = 0\n"
        )
        .unwrap();

        let config = DaemonConfig::load_from_file(&path).unwrap();
        assert_eq!(config.name, "from-file");
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.task.initial_wait_ms, 7);
        assert_eq!(config.task.zero_wait_ms, 0);
        assert_eq!(config.logging, LogConfig::default());
    }

    #[test]
    fn test_builder_from_loaded_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load_with_provider(Toml::string(
            "name = \"layered\"\nhandle_signals = false\n\n[logging]\nlevel = \"debug\"\n",
        ))
        .unwrap();
        assert_eq!(config.name, "layered");
        assert!(!config.handle_signals);
        assert_eq!(config.logging.level, LogLevel::Debug);

        let log_path = dir.path().join("daemon.log");
        let rebuilt = ConfigBuilder::from_config(config)
            .log_file(&log_path)
            .build()
            .unwrap();
        assert_eq!(rebuilt.name, "layered");
        assert_eq!(rebuilt.logging.file, Some(log_path));

        let err = ConfigBuilder::from_config(rebuilt)
            .log_file(dir.path().join("missing").join("daemon.log"))
            .build()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_validate_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_path("", "Configuration Folder", false).is_ok());
        assert_eq!(
            validate_path("", "Configuration Folder", true).unwrap_err().code(),
            ErrorCode::ConfigMissing
        );
        assert!(validate_path(dir.path(), "Configuration Folder", true).is_ok());
        assert_eq!(
            validate_path(dir.path().join("missing.xml"), "Configuration", false)
                .unwrap_err()
                .code(),
            ErrorCode::FileNotFound
        );
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(tracing::Level::from(LogLevel::Info), tracing::Level::INFO);
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    }
}
