//! Lifecycle state and the tri-state hook outcome.
//!
//! [`State`] is the single word every execution context agrees on. It is
//! stored in an [`AtomicState`] so the signal translator, the main poll loop
//! and any worker thread can read and write it without a lock.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum State {
    /// Initial state before `start_all`
    #[default]
    Start = 0,
    /// Normal operation
    Running = 1,
    /// Reload requested, waiting for the next poll to run the reload hook
    Reload = 2,
    /// Terminal state
    Stop = 3,
    /// First user-defined action requested
    User1 = 4,
    /// Second user-defined action requested
    User2 = 5,
}

impl State {
    /// Returns `true` for the terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stop)
    }

    /// Returns `true` for states whose hook is dispatched by the next poll.
    #[must_use]
    pub const fn is_pending_dispatch(self) -> bool {
        matches!(self, Self::Reload | Self::User1 | Self::User2)
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Start,
            1 => Self::Running,
            2 => Self::Reload,
            4 => Self::User1,
            5 => Self::User2,
            // Anything unexpected is treated as the terminal state.
            _ => Self::Stop,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Running => write!(f, "Running"),
            Self::Reload => write!(f, "Reload"),
            Self::Stop => write!(f, "Stop"),
            Self::User1 => write!(f, "User1"),
            Self::User2 => write!(f, "User2"),
        }
    }
}

/// Lock-free cell holding a [`State`].
#[derive(Debug)]
pub struct AtomicState {
    raw: AtomicU8,
}

impl AtomicState {
    /// Create a cell holding `state`.
    #[must_use]
    pub const fn new(state: State) -> Self {
        Self {
            raw: AtomicU8::new(state as u8),
        }
    }

    /// Read the current state.
    #[must_use]
    pub fn load(&self) -> State {
        State::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Replace the current state.
    pub fn store(&self, state: State) {
        self.raw.store(state as u8, Ordering::Release);
    }

    /// Swap in `new` only if the cell still holds `current`.
    ///
    /// # Errors
    ///
    /// Returns the state actually observed when it differs from `current`.
    pub fn compare_exchange(&self, current: State, new: State) -> Result<State, State> {
        self.raw
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(State::from_u8)
            .map_err(State::from_u8)
    }

    /// Store `new` unless the cell already holds the terminal state.
    ///
    /// `Stop` can still be stored over `Stop`.
    ///
    /// # Errors
    ///
    /// Returns `Stop` when the write was refused.
    pub fn store_unless_terminal(&self, new: State) -> Result<State, State> {
        self.raw
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = State::from_u8(raw);
                (!current.is_terminal() || new.is_terminal()).then_some(new as u8)
            })
            .map(State::from_u8)
            .map_err(State::from_u8)
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new(State::Start)
    }
}

/// Outcome of a lifecycle hook.
///
/// `NotApplicable` means no hook was registered (or the application did not
/// implement it) and callers treat it like success. Only `Failure` is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HookResult {
    /// The hook ran and succeeded
    Success,
    /// The hook ran and failed
    Failure,
    /// No hook ran
    #[default]
    NotApplicable,
}

impl HookResult {
    /// Returns `true` only for an explicit failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failure)
    }

    /// Returns `true` only for an explicit success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<bool> for HookResult {
    fn from(value: bool) -> Self {
        if value {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

impl From<Option<bool>> for HookResult {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::NotApplicable, Self::from)
    }
}

impl From<HookResult> for Option<bool> {
    fn from(value: HookResult) -> Self {
        match value {
            HookResult::Success => Some(true),
            HookResult::Failure => Some(false),
            HookResult::NotApplicable => None,
        }
    }
}

impl fmt::Display for HookResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::NotApplicable => write!(f, "not applicable"),
        }
    }
}
