//! Scheduler configuration.
//!
//! Settings come from code (`with_*`), JSON (`from_json_str`) or the
//! environment (`from_env`). Environment variables:
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `EVO_JOBS_WORKER_COUNT` | `usize` | `worker_count` |
//! | `EVO_JOBS_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `EVO_JOBS_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `EVO_JOBS_SHUTDOWN_GRACE_MS` | `u64` | `shutdown_grace_ms` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable name for the worker count.
pub const ENV_WORKER_COUNT: &str = "EVO_JOBS_WORKER_COUNT";
/// Environment variable name for the worker thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "EVO_JOBS_THREAD_NAME_PREFIX";
/// Environment variable name for the worker stack size in bytes.
pub const ENV_THREAD_STACK_SIZE: &str = "EVO_JOBS_THREAD_STACK_SIZE";
/// Environment variable name for the shutdown grace period in milliseconds.
pub const ENV_SHUTDOWN_GRACE_MS: &str = "EVO_JOBS_SHUTDOWN_GRACE_MS";

const MIN_STACK_SIZE: usize = 64 * 1024;

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. Defaults to the number of logical CPUs.
    pub worker_count: usize,
    /// Worker thread names are `{prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Stack size of each worker thread, in bytes.
    pub thread_stack_size: usize,
    /// How long shutdown waits for each worker before detaching it.
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            thread_name_prefix: "evo-worker".to_string(),
            thread_stack_size: 2 * 1024 * 1024,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    /// Set the shutdown grace period in milliseconds.
    #[must_use]
    pub const fn with_shutdown_grace_ms(mut self, ms: u64) -> Self {
        self.shutdown_grace_ms = ms;
        self
    }

    /// Shutdown grace period as a `Duration`.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!(
                "thread_stack_size must be at least {MIN_STACK_SIZE} bytes"
            ));
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overridden by `EVO_JOBS_*` environment variables. A `.env`
    /// file in the working directory is loaded first if present.
    ///
    /// # Errors
    ///
    /// A variable that is set but unparseable, or a failed validation.
    pub fn from_env() -> Result<Self, String> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`SchedulerConfig::from_env`], reading variables through
    /// `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`SchedulerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(val) = lookup(ENV_WORKER_COUNT) {
            cfg.worker_count = parse_usize(ENV_WORKER_COUNT, &val)?;
        }
        if let Some(val) = lookup(ENV_THREAD_NAME_PREFIX) {
            cfg.thread_name_prefix = val;
        }
        if let Some(val) = lookup(ENV_THREAD_STACK_SIZE) {
            cfg.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
        }
        if let Some(val) = lookup(ENV_SHUTDOWN_GRACE_MS) {
            cfg.shutdown_grace_ms = parse_u64(ENV_SHUTDOWN_GRACE_MS, &val)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, String> {
    val.trim().parse::<usize>().map_err(|e| {
        format!("invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})")
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, String> {
    val.trim().parse::<u64>().map_err(|e| {
        format!("invalid value for {var_name}: expected u64, got {val:?} ({e})")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_is_valid() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.worker_count >= 1);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.shutdown_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let err = SchedulerConfig::new().with_worker_count(0).validate().unwrap_err();
        assert!(err.contains("worker_count"));
    }

    #[test]
    fn test_validate_rejects_tiny_stack() {
        let err = SchedulerConfig::new()
            .with_thread_stack_size(1024)
            .validate()
            .unwrap_err();
        assert!(err.contains("thread_stack_size"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_WORKER_COUNT, " 3 "),
            (ENV_THREAD_NAME_PREFIX, "gp"),
            (ENV_SHUTDOWN_GRACE_MS, "250"),
        ]
        .into_iter()
        .collect();
        let cfg = SchedulerConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.thread_name_prefix, "gp");
        assert_eq!(cfg.shutdown_grace_ms, 250);
        assert_eq!(cfg.thread_stack_size, SchedulerConfig::default().thread_stack_size);
    }

    #[test]
    fn test_from_lookup_reports_bad_value() {
        let err = SchedulerConfig::from_lookup(|name| {
            (name == ENV_WORKER_COUNT).then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(err.starts_with("invalid value for EVO_JOBS_WORKER_COUNT"));
    }
}
