//! Application hook contract.
//!
//! An application implements [`AppContext`] and hands it to
//! [`Daemon::attach`]. Every method has a `NotApplicable` default, so an
//! application only overrides what it cares about.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::DaemonConfig;
use crate::daemon::Daemon;
use crate::state::HookResult;

/// Capabilities the lifecycle calls into.
///
/// Implementations may block; nothing here is timed out.
pub trait AppContext: Send + Sync {
    /// Check the configuration before anything starts.
    fn validate_configuration(&self, _config: &DaemonConfig) -> HookResult {
        HookResult::NotApplicable
    }

    /// Prepare and start the application.
    fn process_start(&self) -> HookResult {
        HookResult::NotApplicable
    }

    /// Restart the application in place.
    fn process_restart(&self) -> HookResult {
        HookResult::NotApplicable
    }

    /// Re-read configuration after a reload request.
    fn process_reconfigure(&self) -> HookResult {
        HookResult::NotApplicable
    }

    /// Release everything before the process exits.
    fn process_shutdown(&self) -> HookResult {
        HookResult::NotApplicable
    }

    /// React to the first user signal.
    fn process_user1(&self) -> HookResult {
        HookResult::NotApplicable
    }

    /// React to the second user signal.
    fn process_user2(&self) -> HookResult {
        HookResult::NotApplicable
    }

    /// Periodic work. Receives the previous wait and returns the next one.
    fn process_executing(&self, min_duration: Duration) -> Duration {
        min_duration
    }
}

impl Daemon {
    /// Route the five lifecycle hooks to `app`.
    ///
    /// Replaces any hook installed before.
    pub fn attach<A>(&self, app: &Arc<A>)
    where
        A: AppContext + 'static,
    {
        let ctx = Arc::clone(app);
        self.set_start_hook(move || {
            info!("Start hook called");
            ctx.process_start()
        });

        let ctx = Arc::clone(app);
        self.set_close_hook(move || {
            info!("Close hook called");
            ctx.process_shutdown()
        });

        let ctx = Arc::clone(app);
        self.set_reload_hook(move || {
            info!("Reload hook called");
            ctx.process_reconfigure()
        });

        let ctx = Arc::clone(app);
        self.set_user1_hook(move || {
            info!("User1 hook called");
            ctx.process_user1()
        });

        let ctx = Arc::clone(app);
        self.set_user2_hook(move || {
            info!("User2 hook called");
            ctx.process_user2()
        });
    }
}

/// Step function for a `TaskController<Duration>` backed by
/// [`AppContext::process_executing`].
pub fn step_fn<A>(app: Arc<A>) -> impl FnMut(Duration) -> Duration + Send + 'static
where
    A: AppContext + 'static,
{
    move |wait| app.process_executing(wait)
}
