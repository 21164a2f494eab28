//! Core scheduling abstractions: lifecycle, work units, jobs, the worker
//! pool and the capability handed to running bodies.

pub mod activity;
pub mod error;
pub mod events;
pub mod host;
pub mod ids;
pub mod job;
pub mod metadata;
pub(crate) mod monitor;
pub mod runnable;
pub mod unit;
pub mod worker_pool;

pub use activity::{Activity, ActivityState};
pub use error::{AppResult, SchedulerError};
pub use events::{EventListener, InMemoryEventSink, JobEvent, JobEventKind, ListenerId};
pub use host::Host;
pub use ids::{JobId, UnitId};
pub use job::JobHandle;
pub use metadata::{ExecutionInfo, JobMetadata, OptimizationInfo, SecurityInfo};
pub use runnable::Runnable;
pub use unit::UnitHandle;
pub use worker_pool::{Scheduler, SchedulerStats};
