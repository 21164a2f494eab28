//! Builders for job submission.

pub mod job_builder;

pub use job_builder::JobBuilder;
