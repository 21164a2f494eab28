//! Error types for scheduler operations.

use thiserror::Error;

use crate::core::activity::ActivityState;
use crate::core::ids::{JobId, UnitId};

/// Errors produced by the scheduler and its handles.
///
/// Body failures are never surfaced through this type; they become
/// [`JobEvent`](crate::core::JobEvent)s delivered to listeners.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A lifecycle operation was called in the wrong state.
    #[error("{activity}: invalid state {actual}, expected {expected}")]
    InvalidState {
        /// Name of the activity that rejected the call.
        activity: String,
        /// State the operation requires.
        expected: ActivityState,
        /// State the activity was in.
        actual: ActivityState,
    },
    /// The scheduler no longer accepts submissions.
    #[error("scheduler is not accepting jobs (state: {0})")]
    NotAccepting(ActivityState),
    /// A job quota below one worker.
    #[error("invalid quota: max_workers must be at least 1, got {0}")]
    InvalidQuota(usize),
    /// Required job metadata was not supplied.
    #[error("missing job metadata: {0}")]
    MissingMetadata(&'static str),
    /// Scheduler configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Spawn on a unit whose pending count already reached zero.
    #[error("unit {0} has already finished")]
    UnitFinished(UnitId),
    /// Spawn into a job that has been aborted.
    #[error("job {0} has been aborted")]
    JobAborted(JobId),
    /// The calling worker is not executing a unit body.
    #[error("no unit is executing on this worker")]
    NoCurrentUnit,
    /// An event claimed to come from a job other than the one reporting it.
    #[error("security violation: event for job {claimed} reported from job {actual}")]
    SecurityViolation {
        /// Job id carried by the event.
        claimed: JobId,
        /// Job the reporting body belongs to.
        actual: JobId,
    },
    /// The OS refused to create a thread.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Application-facing result using anyhow; the return type of job bodies.
pub type AppResult<T> = Result<T, anyhow::Error>;
