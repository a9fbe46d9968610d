//! Foreground test console.
//!
//! When the daemon runs in the foreground with the test console enabled, the
//! main loop reads single keys from stdin instead of sleeping.

use std::io::{self, Read, Write};

use tracing::warn;

use crate::daemon::Daemon;
use crate::state::State;

/// Menu shown for `h` or `?`.
pub const HELP: &str = "Application test console:
 r   -  execute reload functions
 R   -  restart the application
 a   -  abort the application
 q   -  quit from application
 v   -  version
 h|? -  this information";

/// A single console key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `q`: stop after running the close hook
    Quit,
    /// `a`: stop, reporting the run as aborted
    Abort,
    /// `r`: request a reload
    Reload,
    /// `R`: restart the application, then reload
    Restart,
    /// `v`: print the version
    Version,
    /// `h` or `?`: print the menu
    Help,
    /// Any other key
    None,
}

impl ConsoleCommand {
    /// Parse a key.
    #[must_use]
    pub const fn from_key(key: u8) -> Self {
        match key {
            b'q' => Self::Quit,
            b'a' => Self::Abort,
            b'r' => Self::Reload,
            b'R' => Self::Restart,
            b'v' => Self::Version,
            b'h' | b'?' => Self::Help,
            _ => Self::None,
        }
    }

    /// Apply the command to `daemon`.
    ///
    /// Forces the state through [`Daemon::set_state`] and returns the state
    /// written, if any. `Version` and `Help` print to stdout.
    pub fn apply(self, daemon: &Daemon) -> Option<State> {
        let state = match self {
            Self::Quit | Self::Abort => State::Stop,
            Self::Reload | Self::Restart => State::Reload,
            Self::Version => {
                print_line(&format!(" v.{}", crate::VERSION));
                return None;
            }
            Self::Help => {
                print_line(HELP);
                return None;
            }
            Self::None => return None,
        };
        daemon.set_state(state);
        Some(state)
    }
}

fn print_line(text: &str) {
    print_to(&mut io::stdout().lock(), text);
}

fn print_to<W: Write>(out: &mut W, text: &str) {
    if let Err(e) = writeln!(out, "{text}").and_then(|()| out.flush()) {
        warn!(error = %e, "Failed to write console output");
    }
}

/// Source of console commands.
pub trait ConsoleInput: Send {
    /// Block until the next key arrives.
    ///
    /// Returns `Ok(None)` once the input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn next_command(&mut self) -> io::Result<Option<ConsoleCommand>>;
}

/// Reads keys from the process's stdin.
#[derive(Debug, Default)]
pub struct StdinConsole;

impl ConsoleInput for StdinConsole {
    fn next_command(&mut self) -> io::Result<Option<ConsoleCommand>> {
        read_key(&mut io::stdin().lock())
    }
}

/// Reads keys from any byte source.
#[derive(Debug)]
pub struct ReaderConsole<R> {
    reader: R,
}

impl<R: Read + Send> ReaderConsole<R> {
    /// Wrap `reader`.
    pub const fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: Read + Send> ConsoleInput for ReaderConsole<R> {
    fn next_command(&mut self) -> io::Result<Option<ConsoleCommand>> {
        read_key(&mut self.reader)
    }
}

fn read_key<R: Read>(reader: &mut R) -> io::Result<Option<ConsoleCommand>> {
    let mut key = [0_u8; 1];
    loop {
        match reader.read(&mut key) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(ConsoleCommand::from_key(key[0]))),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
