//! Tests for configuration loading and validation

use evo_jobs::config::{
    SchedulerConfig, ENV_SHUTDOWN_GRACE_MS, ENV_THREAD_NAME_PREFIX, ENV_THREAD_STACK_SIZE,
    ENV_WORKER_COUNT,
};
use evo_jobs::core::{Scheduler, SchedulerError};

#[test]
fn test_json_partial_config_uses_defaults() {
    let cfg = SchedulerConfig::from_json_str(r#"{ "worker_count": 3 }"#).unwrap();
    assert_eq!(cfg.worker_count, 3);
    assert_eq!(cfg.thread_name_prefix, "evo-worker");
    assert_eq!(cfg.shutdown_grace_ms, 2_000);
}

#[test]
fn test_json_full_config_round_trip() {
    let cfg = SchedulerConfig::new()
        .with_worker_count(6)
        .with_thread_name_prefix("gp")
        .with_thread_stack_size(512 * 1024)
        .with_shutdown_grace_ms(100);
    let text = serde_json::to_string(&cfg).unwrap();
    assert_eq!(SchedulerConfig::from_json_str(&text).unwrap(), cfg);
}

#[test]
fn test_json_invalid_values() {
    let err = SchedulerConfig::from_json_str(r#"{ "worker_count": 0 }"#).unwrap_err();
    assert!(err.contains("worker_count"));

    let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_lookup_reads_every_variable() {
    let cfg = SchedulerConfig::from_lookup(|name| {
        let value = match name {
            ENV_WORKER_COUNT => "5",
            ENV_THREAD_NAME_PREFIX => "island",
            ENV_THREAD_STACK_SIZE => "1048576",
            ENV_SHUTDOWN_GRACE_MS => "10",
            _ => return None,
        };
        Some(value.to_string())
    })
    .unwrap();
    assert_eq!(cfg.worker_count, 5);
    assert_eq!(cfg.thread_name_prefix, "island");
    assert_eq!(cfg.thread_stack_size, 1_048_576);
    assert_eq!(cfg.shutdown_grace_ms, 10);
}

#[test]
fn test_lookup_without_variables_is_default() {
    let cfg = SchedulerConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, SchedulerConfig::default());
}

#[test]
fn test_scheduler_rejects_invalid_config() {
    let err = Scheduler::new(SchedulerConfig::new().with_thread_name_prefix("")).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidConfig(_)));
    assert!(err.to_string().starts_with("invalid configuration:"));
}

#[test]
fn test_scheduler_uses_configured_worker_count() {
    let scheduler = Scheduler::new(SchedulerConfig::new().with_worker_count(3)).unwrap();
    assert_eq!(scheduler.worker_count(), 3);
    assert_eq!(scheduler.config().worker_count, 3);
    assert_eq!(scheduler.stats().worker_count, 3);
}
