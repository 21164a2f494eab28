//! Configuration models for the scheduler.

pub mod scheduler;

pub use scheduler::{
    SchedulerConfig, ENV_SHUTDOWN_GRACE_MS, ENV_THREAD_NAME_PREFIX, ENV_THREAD_STACK_SIZE,
    ENV_WORKER_COUNT,
};
