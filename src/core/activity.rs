//! Four-state lifecycle shared by the scheduler and its workers.
//!
//! ```text
//! Initialized --start--> Running --abort--> Terminating --finished--> Terminated
//!      \____________________abort_____________/
//! ```
//!
//! `start` runs the owner's start hook on the calling thread. `abort` runs the
//! abort hook on a separate thread so the caller never blocks on shutdown.
//! Only the owner calls `finished`, once its work has actually wound down.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::core::error::SchedulerError;
use crate::core::monitor::Monitor;
use crate::util::interrupt;

/// Lifecycle state of an [`Activity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    /// Created, not yet started.
    Initialized,
    /// Started and doing work.
    Running,
    /// Abort requested; winding down.
    Terminating,
    /// Finished. Terminal.
    Terminated,
}

impl ActivityState {
    /// Whether the activity can never run (again).
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// A startable, abortable, waitable state machine.
pub struct Activity {
    name: String,
    state: Monitor<ActivityState>,
}

impl Activity {
    /// Create an activity in [`ActivityState::Initialized`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Monitor::new(ActivityState::Initialized),
        }
    }

    /// Name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        *self.state.lock()
    }

    /// Whether the activity is [`ActivityState::Running`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ActivityState::Running
    }

    /// Whether the activity is [`ActivityState::Terminated`].
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state() == ActivityState::Terminated
    }

    /// Whether the activity is terminating or terminated.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.state().is_final()
    }

    /// Move to `Running`, then run `on_start`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` unless the activity is `Initialized`.
    /// If the hook fails the activity is marked `Terminated` and the hook's
    /// error is returned.
    pub fn start<F>(&self, on_start: F) -> Result<(), SchedulerError>
    where
        F: FnOnce() -> Result<(), SchedulerError>,
    {
        {
            let mut state = self.state.lock();
            if *state != ActivityState::Initialized {
                return Err(SchedulerError::InvalidState {
                    activity: self.name.clone(),
                    expected: ActivityState::Initialized,
                    actual: *state,
                });
            }
            *state = ActivityState::Running;
            self.state.notify_all();
        }
        debug!(activity = %self.name, "activity started");

        if let Err(err) = on_start() {
            error!(activity = %self.name, error = %err, "start hook failed");
            self.begin_abort();
            self.finished();
            return Err(err);
        }
        Ok(())
    }

    /// Request termination; `on_abort` runs on its own thread.
    ///
    /// Returns `false` (and drops the hook) if the activity was already
    /// terminating or terminated.
    pub fn abort<F>(&self, on_abort: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.begin_abort() {
            return false;
        }

        let slot = Arc::new(Mutex::new(Some(on_abort)));
        let remote = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name(format!("{}-abort", self.name))
            .spawn(move || {
                if let Some(hook) = remote.lock().take() {
                    hook();
                }
            });

        if let Err(err) = spawned {
            warn!(activity = %self.name, error = %err, "abort thread unavailable, aborting inline");
            if let Some(hook) = slot.lock().take() {
                hook();
            }
        }
        true
    }

    /// Transition to `Terminating` without running any hook.
    pub(crate) fn begin_abort(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ActivityState::Initialized | ActivityState::Running => {
                *state = ActivityState::Terminating;
                self.state.notify_all();
                debug!(activity = %self.name, "activity terminating");
                true
            }
            ActivityState::Terminating | ActivityState::Terminated => false,
        }
    }

    /// Mark the activity `Terminated` and wake every waiter. Idempotent.
    pub fn finished(&self) {
        let mut state = self.state.lock();
        if *state != ActivityState::Terminated {
            *state = ActivityState::Terminated;
            self.state.notify_all();
            debug!(activity = %self.name, "activity terminated");
        }
    }

    /// Block until `Terminated`.
    ///
    /// Returns `false` if `interruptible` and the calling thread was
    /// interrupted first; the activity itself is left alone.
    pub fn wait_for(&self, interruptible: bool) -> bool {
        let token = interruptible.then(interrupt::current);
        let mut state = self.state.lock();
        self.state
            .wait_while(&mut state, token.as_deref(), None, |s| {
                *s != ActivityState::Terminated
            })
            .is_satisfied()
    }

    /// Block until `Terminated` or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        self.state
            .wait_while(&mut state, None, Some(deadline), |s| {
                *s != ActivityState::Terminated
            })
            .is_satisfied()
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_start_runs_hook_once() {
        let activity = Activity::new("test");
        let mut calls = 0;
        activity
            .start(|| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(activity.is_running());

        let err = activity.start(|| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidState {
                actual: ActivityState::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_failed_start_hook_terminates() {
        let activity = Activity::new("test");
        let err = activity
            .start(|| Err(SchedulerError::InvalidConfig("nope".into())))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidConfig(_)));
        assert!(activity.is_terminated());
        // Already past Terminating; nothing left to abort.
        assert!(!activity.begin_abort());
        assert!(!activity.abort(|| panic!("must not run")));
        assert!(activity.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_abort_runs_hook_asynchronously() {
        let activity = Arc::new(Activity::new("test"));
        activity.start(|| Ok(())).unwrap();

        let ran = Arc::new(AtomicBool::new(false));
        let hook_ran = Arc::clone(&ran);
        let hook_activity = Arc::clone(&activity);
        assert!(activity.abort(move || {
            hook_ran.store(true, Ordering::SeqCst);
            hook_activity.finished();
        }));
        assert!(activity.is_final());

        assert!(activity.wait_for(false));
        assert!(ran.load(Ordering::SeqCst));
        assert!(activity.is_terminated());

        // A second abort is a no-op.
        assert!(!activity.abort(|| panic!("must not run")));
    }

    #[test]
    fn test_abort_from_initialized() {
        let activity = Activity::new("test");
        assert!(activity.begin_abort());
        assert_eq!(activity.state(), ActivityState::Terminating);
        assert!(activity.start(|| Ok(())).is_err());
        activity.finished();
        activity.finished();
        assert!(activity.is_terminated());
    }

    #[test]
    fn test_wait_timeout_and_interrupt() {
        let activity = Activity::new("test");
        assert!(!activity.wait_timeout(Duration::from_millis(10)));

        interrupt::current().interrupt();
        assert!(!activity.wait_for(true));
        assert_eq!(activity.state(), ActivityState::Initialized);
    }
}
