//! # evo_jobs
//!
//! A multi-processor job scheduler for population-based optimization
//! experiments (evolutionary algorithms, genetic programming).
//!
//! Experiments submit *jobs*: closures that run on a fixed pool of worker
//! threads and may recursively spawn *sub-jobs* from inside their body. The
//! scheduler tracks completion across the whole tree of nested work, caps
//! how many workers one job may occupy, and never lets a waiting worker sit
//! idle while there is work it could run.
//!
//! ## Core Problem Solved
//!
//! Evaluating a population is naturally recursive: a generation spawns one
//! sub-job per individual, an individual may spawn one per fitness case, and
//! the parent must wait for all of them. With a plain thread pool, a pool
//! full of parents waiting on children that no free thread can run
//! deadlocks. Here every wait issued from a worker thread *helps*: it runs
//! queued work of the job it is waiting on until the wait is satisfied.
//!
//! ## Key Features
//!
//! - **Nested work**: [`Host::spawn`](core::Host::spawn) from inside a body,
//!   [`Host::flush_children`](core::Host::flush_children) to wait for the
//!   children spawned so far
//! - **Per-job quota**: at most `max_workers` workers charged to a job at once
//! - **Helping waits**: waits on a worker thread run pool work instead of
//!   blocking
//! - **Cancellation**: abort a single job or the whole scheduler; queued
//!   sub-jobs are finished without running
//! - **Failure isolation**: a body that errors or panics becomes a
//!   [`JobEvent`](core::JobEvent) for listeners; the job still completes
//!
//! ## Example
//!
//! ```rust,ignore
//! use evo_jobs::config::SchedulerConfig;
//! use evo_jobs::core::{OptimizationInfo, Scheduler, SecurityInfo};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::from_env()?)?;
//! scheduler.start()?;
//!
//! let generation = scheduler
//!     .job()
//!     .max_workers(4)
//!     .security(SecurityInfo::new("lab"))
//!     .optimization(OptimizationInfo::new("symbolic-regression"))
//!     .submit(|host| {
//!         for individual in 0..100 {
//!             host.spawn(move |host| {
//!                 let noise: f64 = host.with_random(|rng| rand::Rng::random(rng));
//!                 tracing::debug!(individual, noise, "evaluated");
//!                 Ok(())
//!             })?;
//!         }
//!         host.flush_children();
//!         Ok(())
//!     })?;
//!
//! generation.wait_for(false);
//! scheduler.abort();
//! scheduler.wait_for(false);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: lifecycle, units, jobs, workers, host.
pub mod core;
/// Configuration models for the scheduler.
pub mod config;
/// Builders for job submission.
pub mod builders;
/// Shared utilities.
pub mod util;
