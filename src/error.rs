//! Error handling for the daemon lifecycle runtime.
//!
//! Lifecycle hooks never return errors: they report a tri-state
//! [`HookResult`](crate::HookResult). This module covers everything around
//! them, such as configuration loading, signal registration, daemonization,
//! pid-file handling and the launch sequence.
//!
//! Each error variant carries:
//!
//! * **Error Code**: a stable identifier for programmatic handling
//! * **Message**: a human-readable description
//! * **Source**: the optional underlying error
//!
//! ```no_run
//! use daemon_lifecycle::{Error, Result};
//! use std::fs::File;
//!
//! fn read_settings(path: &str) -> Result<File> {
//!     File::open(path).map_err(|err| {
//!         Error::io_with_source(format!("Failed to open settings file: {path}"), err)
//!     })
//! }
//! ```

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by every variant.
type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error code enum for categorizing and identifying errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    // Configuration errors: 1000-1999
    /// Configuration values failed validation
    ConfigInvalid = 1000,
    /// Configuration sources could not be parsed
    ConfigParse = 1001,
    /// A mandatory path is missing
    ConfigMissing = 1002,

    // Signal handling errors: 2000-2999
    /// Registering OS signal handlers failed
    SignalRegisterFailed = 2000,

    // Daemonization errors: 3000-3999
    /// Detaching from the controlling terminal failed
    DaemonizeFailed = 3000,
    /// Daemonization was already attempted
    AlreadyDaemonized = 3001,
    /// The pid file could not be written
    PidFileWrite = 3002,

    // IO errors: 5000-5999
    /// Generic I/O failure
    IoError = 5000,
    /// File does not exist
    FileNotFound = 5001,

    // Runtime errors: 6000-6999
    /// The run was aborted from the test console
    RuntimeAborted = 6001,
    /// The single-instance lock is held elsewhere
    LockFailed = 6002,
    /// A worker thread could not be spawned
    RuntimeSpawnError = 6003,

    // Hook errors: 7000-7999
    /// A lifecycle hook reported failure
    HookFailed = 7000,

    // State errors: 9000-9999
    /// The requested transition is not allowed from the current state
    InvalidStateTransition = 9000,
    /// The component is in an unexpected state
    InvalidStateValue = 9001,

    // Platform errors: 10000-10999
    /// The operation is not available on this platform
    PlatformNotSupported = 10000,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.as_str(), *self as i32)
    }
}

impl ErrorCode {
    /// Convert error code to string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigParse => "CONFIG_PARSE",
            Self::ConfigMissing => "CONFIG_MISSING",

            Self::SignalRegisterFailed => "SIGNAL_REGISTER_FAILED",

            Self::DaemonizeFailed => "DAEMONIZE_FAILED",
            Self::AlreadyDaemonized => "ALREADY_DAEMONIZED",
            Self::PidFileWrite => "PID_FILE_WRITE",

            Self::IoError => "IO_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",

            Self::RuntimeAborted => "RUNTIME_ABORTED",
            Self::LockFailed => "LOCK_FAILED",
            Self::RuntimeSpawnError => "RUNTIME_SPAWN_ERROR",

            Self::HookFailed => "HOOK_FAILED",

            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::InvalidStateValue => "INVALID_STATE_VALUE",

            Self::PlatformNotSupported => "PLATFORM_NOT_SUPPORTED",
        }
    }
}

/// Error type for all lifecycle operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error [{code}]: {message}")]
    Config {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxedSource>,
    },

    /// Signal registration errors
    #[error("Signal handling error [{code}]: {message}{signal:?}")]
    Signal {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Signal number if applicable
        signal: Option<i32>,
        /// Optional source error for better context
        #[source]
        source: Option<BoxedSource>,
    },

    /// Detaching from the terminal or writing the pid file failed
    #[error("Daemonize error [{code}]: {message}")]
    Daemonize {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxedSource>,
    },

    /// I/O operation errors
    #[error("I/O error [{code}]: {message}")]
    Io {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxedSource>,
    },

    /// A lifecycle hook reported an explicit failure
    #[error("Hook '{hook}' failed [{code}]: {message}")]
    Hook {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Name of the hook
        hook: String,
        /// Human-readable error message
        message: String,
    },

    /// Invalid state errors
    #[error("Invalid state [{code}]: {message}{current_state:?}")]
    InvalidState {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Current state if applicable
        current_state: Option<String>,
    },

    /// Platform-specific errors
    #[error("Platform error [{code}]: {message} (platform: {platform})")]
    Platform {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Platform identifier
        platform: String,
    },

    /// Runtime errors
    #[error("Runtime error [{code}]: {message}")]
    Runtime {
        /// Error code for structured error handling
        code: ErrorCode,
        /// Human-readable error message
        message: String,
        /// Optional source error for better context
        #[source]
        source: Option<BoxedSource>,
    },
}

impl Error {
    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            code: ErrorCode::ConfigInvalid,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new configuration error with specific code.
    pub fn config_with_code<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new signal registration error with source error.
    pub fn signal_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Signal {
            code: ErrorCode::SignalRegisterFailed,
            message: message.into(),
            signal: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create a new daemonize error with specific code.
    pub fn daemonize<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Daemonize {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new daemonize error with specific code and source error.
    pub fn daemonize_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        code: ErrorCode,
        message: S,
        source: E,
    ) -> Self {
        Self::Daemonize {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new I/O error with source error.
    pub fn io_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Io {
            code: ErrorCode::IoError,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a new hook failure error.
    pub fn hook<H: Into<String>, S: Into<String>>(hook: H, message: S) -> Self {
        Self::Hook {
            code: ErrorCode::HookFailed,
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid state error.
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            code: ErrorCode::InvalidStateValue,
            message: message.into(),
            current_state: None,
        }
    }

    /// Create a new invalid state error with current state.
    pub fn invalid_state_with_current<S: Into<String>, C: Into<String>>(
        message: S,
        current_state: C,
    ) -> Self {
        Self::InvalidState {
            code: ErrorCode::InvalidStateTransition,
            message: message.into(),
            current_state: Some(current_state.into()),
        }
    }

    /// Create a new platform error.
    pub fn platform<S: Into<String>, P: Into<String>>(message: S, platform: P) -> Self {
        Self::Platform {
            code: ErrorCode::PlatformNotSupported,
            message: message.into(),
            platform: platform.into(),
        }
    }

    /// Create a new runtime error with specific code.
    pub fn runtime_with_code<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self::Runtime {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new runtime error with specific code and source error.
    pub fn runtime_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        code: ErrorCode,
        message: S,
        source: E,
    ) -> Self {
        Self::Runtime {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Get the structured code of this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config { code, .. }
            | Self::Signal { code, .. }
            | Self::Daemonize { code, .. }
            | Self::Io { code, .. }
            | Self::Hook { code, .. }
            | Self::InvalidState { code, .. }
            | Self::Platform { code, .. }
            | Self::Runtime { code, .. } => *code,
        }
    }

    /// Check if this error is configuration-related.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Get the error category for logging.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Signal { .. } => "signal",
            Self::Daemonize { .. } => "daemonize",
            Self::Io { .. } => "io",
            Self::Hook { .. } => "hook",
            Self::InvalidState { .. } => "state",
            Self::Platform { .. } => "platform",
            Self::Runtime { .. } => "runtime",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_with_source("I/O operation failed", err)
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::Config {
            code: ErrorCode::ConfigParse,
            message: format!("Configuration loading failed: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::config("test message");
        assert!(err.is_config_error());
        assert_eq!(err.category(), "config");
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_hook_error_display() {
        let err = Error::hook("before-start", "application refused to start");
        assert_eq!(err.category(), "hook");
        let text = err.to_string();
        assert!(text.contains("before-start"));
        assert!(text.contains("HOOK_FAILED(7000)"));
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::from(io_err);
        assert_eq!(err.code(), ErrorCode::IoError);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_daemonize_codes() {
        let err = Error::daemonize(ErrorCode::AlreadyDaemonized, "already attempted");
        assert_eq!(err.category(), "daemonize");
        assert_eq!(err.code().as_str(), "ALREADY_DAEMONIZED");
    }
}
