#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
//! # daemon-lifecycle: lifecycle runtime for Unix daemons
//!
//! A small runtime skeleton for long-running background processes. It owns
//! the process lifecycle state, translates OS signals into that state and
//! drives cancellable periodic work whose wait interval is chosen by the
//! work itself.
//!
//! ## Key Features
//!
//! - **Lock-free lifecycle state**: signals only store an atomic state; hooks
//!   run from the main loop's poll
//! - **Tri-state hooks**: `Success`, `Failure` or `NotApplicable`
//! - **Variable-interval tasks**: the step function returns its next wait
//! - **Prompt cancellation**: sleeping tasks are woken, not waited out
//! - **Daemonization**: one-shot detach with pid file and instance lock
//! - **Configuration**: defaults, TOML file and environment via figment
//! - **Structured Logging**: tracing with optional JSON output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daemon_lifecycle::{AppContext, Daemon, DaemonConfig, HookResult, Result};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Service;
//!
//! impl AppContext for Service {
//!     fn process_start(&self) -> HookResult {
//!         HookResult::Success
//!     }
//!
//!     fn process_executing(&self, wait: Duration) -> Duration {
//!         tracing::info!("Service working...");
//!         wait
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let config = DaemonConfig::load()?;
//!     let daemon = Arc::new(Daemon::new());
//!     daemon_lifecycle::run(&daemon, &Arc::new(Service), &config, None)
//! }
//! ```

// Private modules
mod cancel;
mod config;
mod context;
mod daemon;
mod error;
mod event;
mod launch;
mod logging;
mod state;
mod task;

// Public modules
pub mod console;
pub mod lock;
pub mod signal;

// Public exports
pub use cancel::{CancelCallback, CancellationSource, CancellationToken};
pub use config::{validate_path, ConfigBuilder, DaemonConfig, LogConfig, LogLevel, TaskConfig};
pub use context::{step_fn, AppContext};
pub use daemon::{Daemon, DaemonStats, Daemonizer, Hook, SystemDaemonizer};
pub use error::{Error, ErrorCode, Result};
pub use event::WakeableEvent;
pub use launch::run;
pub use logging::{init_logging, RotatingFileGuard, RotatingFileWriter};
pub use signal::{Interrupt, SignalConfig};
pub use state::{AtomicState, HookResult, State};
pub use task::{Interval, Millis, TaskController};

#[cfg(unix)]
pub use signal::SignalTranslator;

/// Version of the daemon-lifecycle library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "lifecycled.toml";
