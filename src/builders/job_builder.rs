//! Step-by-step job submission.
//!
//! [`JobBuilder`] collects the three metadata parts and refuses to submit
//! until all of them are present, so a forgotten part surfaces as
//! `SchedulerError::MissingMetadata` instead of a half-configured job.

use crate::core::{
    AppResult, ExecutionInfo, Host, JobHandle, JobMetadata, OptimizationInfo, Runnable,
    Scheduler, SchedulerError, SecurityInfo,
};

/// Builder returned by [`Scheduler::job`].
#[derive(Debug)]
pub struct JobBuilder<'a> {
    scheduler: &'a Scheduler,
    execution: Option<ExecutionInfo>,
    security: Option<SecurityInfo>,
    optimization: Option<OptimizationInfo>,
}

impl<'a> JobBuilder<'a> {
    pub(crate) const fn new(scheduler: &'a Scheduler) -> Self {
        Self {
            scheduler,
            execution: None,
            security: None,
            optimization: None,
        }
    }

    /// Shorthand for `execution(ExecutionInfo::new(max_workers))`.
    #[must_use]
    pub fn max_workers(self, max_workers: usize) -> Self {
        self.execution(ExecutionInfo::new(max_workers))
    }

    /// Set the execution constraints.
    #[must_use]
    pub fn execution(mut self, execution: ExecutionInfo) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Set the submitting identity.
    #[must_use]
    pub fn security(mut self, security: SecurityInfo) -> Self {
        self.security = Some(security);
        self
    }

    /// Set the domain configuration.
    #[must_use]
    pub fn optimization(mut self, optimization: OptimizationInfo) -> Self {
        self.optimization = Some(optimization);
        self
    }

    /// The assembled metadata.
    ///
    /// # Errors
    ///
    /// `MissingMetadata` for an absent part, `InvalidQuota` for a zero
    /// quota.
    pub fn metadata(&self) -> Result<JobMetadata, SchedulerError> {
        JobMetadata::from_parts(
            self.execution.clone(),
            self.security.clone(),
            self.optimization.clone(),
        )
    }

    /// Submit `body` with the collected metadata.
    ///
    /// # Errors
    ///
    /// Any metadata error, or any error of [`Scheduler::submit`].
    pub fn submit<F>(self, body: F) -> Result<JobHandle, SchedulerError>
    where
        F: FnOnce(&Host) -> AppResult<()> + Send + 'static,
    {
        let metadata = self.metadata()?;
        self.scheduler.submit(body, metadata)
    }

    /// Submit a [`Runnable`] with the collected metadata.
    ///
    /// # Errors
    ///
    /// Same as [`JobBuilder::submit`].
    pub fn submit_runnable<R: Runnable>(self, runnable: R) -> Result<JobHandle, SchedulerError> {
        let metadata = self.metadata()?;
        self.scheduler.submit_runnable(runnable, metadata)
    }
}
