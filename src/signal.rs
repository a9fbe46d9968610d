//! Translation of OS signals into lifecycle states.
//!
//! The actual async-signal handler is `signal-hook`'s self-pipe writer; it
//! does nothing but record the signal. A dedicated translator thread reads the
//! pipe and calls [`Daemon::deliver`], which is a single atomic store. No hook
//! ever runs from signal context.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::daemon::Daemon;
use crate::error::{Error, ErrorCode, Result};
use crate::state::State;

#[cfg(unix)]
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

/// The five interrupts a daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interrupt {
    /// `SIGINT`: stop now
    Exit,
    /// `SIGTERM`: stop gracefully
    Terminate,
    /// `SIGHUP`: reload
    Reload,
    /// `SIGUSR1`
    User1,
    /// `SIGUSR2`
    User2,
}

impl Interrupt {
    /// Every interrupt, in registration order.
    pub const ALL: [Self; 5] = [
        Self::Exit,
        Self::Terminate,
        Self::Reload,
        Self::User1,
        Self::User2,
    ];

    /// State stored when this interrupt arrives.
    #[must_use]
    pub const fn target_state(self) -> State {
        match self {
            Self::Exit | Self::Terminate => State::Stop,
            Self::Reload => State::Reload,
            Self::User1 => State::User1,
            Self::User2 => State::User2,
        }
    }

    /// OS signal number.
    #[cfg(unix)]
    #[must_use]
    pub const fn signal(self) -> i32 {
        match self {
            Self::Exit => SIGINT,
            Self::Terminate => SIGTERM,
            Self::Reload => SIGHUP,
            Self::User1 => SIGUSR1,
            Self::User2 => SIGUSR2,
        }
    }

    /// Map an OS signal number back to an interrupt.
    #[cfg(unix)]
    #[must_use]
    pub const fn from_signal(signal: i32) -> Option<Self> {
        match signal {
            SIGINT => Some(Self::Exit),
            SIGTERM => Some(Self::Terminate),
            SIGHUP => Some(Self::Reload),
            SIGUSR1 => Some(Self::User1),
            SIGUSR2 => Some(Self::User2),
            _ => None,
        }
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit => write!(f, "exit"),
            Self::Terminate => write!(f, "terminate"),
            Self::Reload => write!(f, "reload"),
            Self::User1 => write!(f, "user1"),
            Self::User2 => write!(f, "user2"),
        }
    }
}

/// Helper function to get a human-readable description of a signal.
#[cfg(unix)]
#[must_use]
pub const fn signal_description(signal: i32) -> &'static str {
    match signal {
        SIGHUP => "SIGHUP (Hangup/Reload)",
        SIGINT => "SIGINT (Interrupt/Ctrl+C)",
        SIGTERM => "SIGTERM (Terminate)",
        SIGUSR1 => "SIGUSR1 (User signal 1)",
        SIGUSR2 => "SIGUSR2 (User signal 2)",
        _ => "Unknown signal",
    }
}

/// Which interrupts get an OS handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalConfig {
    enabled: Vec<Interrupt>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            enabled: Interrupt::ALL.to_vec(),
        }
    }
}

impl SignalConfig {
    /// Create a configuration handling all five interrupts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration handling nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            enabled: Vec::new(),
        }
    }

    /// Handle `interrupt`.
    #[must_use]
    pub fn with(mut self, interrupt: Interrupt) -> Self {
        if !self.enabled.contains(&interrupt) {
            self.enabled.push(interrupt);
        }
        self
    }

    /// Leave `interrupt` at its default OS disposition.
    #[must_use]
    pub fn without(mut self, interrupt: Interrupt) -> Self {
        self.enabled.retain(|enabled| *enabled != interrupt);
        self
    }

    /// Interrupts that will be handled.
    #[must_use]
    pub fn enabled(&self) -> &[Interrupt] {
        &self.enabled
    }

    /// Check whether `interrupt` will be handled.
    #[must_use]
    pub fn is_enabled(&self, interrupt: Interrupt) -> bool {
        self.enabled.contains(&interrupt)
    }
}

/// Running signal translator.
///
/// Dropping it unregisters the handlers and joins the thread.
#[cfg(unix)]
pub struct SignalTranslator {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

#[cfg(unix)]
impl fmt::Debug for SignalTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalTranslator")
            .field("running", &self.thread.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
impl SignalTranslator {
    /// Register handlers for the enabled interrupts and start translating
    /// them into state changes on `daemon`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handlers cannot be registered or the
    /// translator thread cannot be spawned.
    pub fn install(daemon: Arc<Daemon>, config: &SignalConfig) -> Result<Self> {
        let numbers: Vec<i32> = config.enabled().iter().map(|i| i.signal()).collect();
        let mut signals = signal_hook::iterator::Signals::new(&numbers)
            .map_err(|e| Error::signal_with_source("Failed to register signal handlers", e))?;
        let handle = signals.handle();

        let thread = std::thread::Builder::new()
            .name("signal-translator".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match Interrupt::from_signal(signal) {
                        Some(interrupt) => {
                            info!(
                                signal = signal_description(signal),
                                state = %interrupt.target_state(),
                                "Signal received"
                            );
                            daemon.deliver(interrupt);
                        }
                        None => warn!(signal, "Ignoring unmapped signal"),
                    }
                }
                debug!("Signal translator finished");
            })
            .map_err(|e| {
                handle.close();
                Error::runtime_with_source(
                    ErrorCode::RuntimeSpawnError,
                    "Failed to spawn signal translator thread",
                    e,
                )
            })?;

        info!(
            interrupts = ?config.enabled(),
            "Signal handlers registered"
        );
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Unregister the handlers and wait for the translator thread.
    pub fn stop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Signal translator thread panicked");
            }
        }
    }
}

#[cfg(unix)]
impl Drop for SignalTranslator {
    fn drop(&mut self) {
        self.stop();
    }
}
