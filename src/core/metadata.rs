//! Metadata attached to a job at submission.
//!
//! The scheduler only reads the execution quota; security and optimization
//! info ride along for the bodies (see [`Host::job_metadata`]).
//!
//! [`Host::job_metadata`]: crate::core::Host::job_metadata

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;

/// Execution constraints for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    /// Maximum number of workers charged against the job at once.
    pub max_workers: usize,
}

impl ExecutionInfo {
    /// Execution info with the given quota.
    #[must_use]
    pub const fn new(max_workers: usize) -> Self {
        Self { max_workers }
    }
}

/// Identity the job runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    /// Submitting principal.
    pub principal: String,
    /// Roles granted to the job.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SecurityInfo {
    /// Security info for `principal` with no roles.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            roles: Vec::new(),
        }
    }

    /// Add a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Whether `role` was granted.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Domain configuration of the optimization run. Opaque to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationInfo {
    /// Experiment or problem name.
    pub name: String,
    /// Free-form parameters (population size, operators, seeds, ...).
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl OptimizationInfo {
    /// Optimization info with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: serde_json::Value::Null,
        }
    }

    /// Replace the parameter document.
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Look up a top-level parameter.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&serde_json::Value> {
        self.parameters.get(key)
    }
}

/// Everything a job carries besides its body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Quota and other execution constraints.
    pub execution: ExecutionInfo,
    /// Identity of the submitter.
    pub security: SecurityInfo,
    /// Domain configuration.
    pub optimization: OptimizationInfo,
}

impl JobMetadata {
    /// Bundle the three metadata parts.
    #[must_use]
    pub const fn new(
        execution: ExecutionInfo,
        security: SecurityInfo,
        optimization: OptimizationInfo,
    ) -> Self {
        Self {
            execution,
            security,
            optimization,
        }
    }

    /// Assemble metadata from optional parts, rejecting missing ones.
    ///
    /// # Errors
    ///
    /// `SchedulerError::MissingMetadata` naming the first absent part, or
    /// any error from [`JobMetadata::validate`].
    pub fn from_parts(
        execution: Option<ExecutionInfo>,
        security: Option<SecurityInfo>,
        optimization: Option<OptimizationInfo>,
    ) -> Result<Self, SchedulerError> {
        let execution = execution.ok_or(SchedulerError::MissingMetadata("execution"))?;
        let security = security.ok_or(SchedulerError::MissingMetadata("security"))?;
        let optimization = optimization.ok_or(SchedulerError::MissingMetadata("optimization"))?;
        let metadata = Self::new(execution, security, optimization);
        metadata.validate()?;
        Ok(metadata)
    }

    /// The job's worker quota.
    #[must_use]
    pub const fn max_workers(&self) -> usize {
        self.execution.max_workers
    }

    /// Check the quota and required fields.
    ///
    /// # Errors
    ///
    /// `InvalidQuota` for a zero quota, `MissingMetadata` for a blank
    /// principal or optimization name.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.execution.max_workers == 0 {
            return Err(SchedulerError::InvalidQuota(0));
        }
        if self.security.principal.trim().is_empty() {
            return Err(SchedulerError::MissingMetadata("security.principal"));
        }
        if self.optimization.name.trim().is_empty() {
            return Err(SchedulerError::MissingMetadata("optimization.name"));
        }
        Ok(())
    }
}
