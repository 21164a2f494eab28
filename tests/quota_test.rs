//! Quota enforcement under contention
//!
//! Many independent jobs with a small quota share a pool large enough that,
//! without the quota, every job could take several workers at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evo_jobs::config::SchedulerConfig;
use evo_jobs::core::{ExecutionInfo, JobMetadata, OptimizationInfo, Scheduler, SecurityInfo};

const QUOTA: usize = 2;
const JOBS: usize = QUOTA + 5;
const WORKERS: usize = QUOTA + 5;
const CHILDREN: usize = 12;

/// Per-job concurrency observations.
#[derive(Default)]
struct Observed {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    max_assigned: AtomicUsize,
}

#[test]
fn test_quota_never_exceeded() {
    println!("\n=== test_quota_never_exceeded ===");
    let scheduler = Scheduler::new(
        SchedulerConfig::new()
            .with_worker_count(WORKERS)
            .with_thread_name_prefix("quota"),
    )
    .expect("Failed to create scheduler");
    scheduler.start().expect("Failed to start");

    let submitted: Vec<_> = (0..JOBS)
        .map(|n| {
            let observed = Arc::new(Observed::default());
            let probe = Arc::clone(&observed);
            let job = scheduler
                .submit(
                    move |host| {
                        for _ in 0..CHILDREN {
                            let probe = Arc::clone(&probe);
                            host.spawn(move |host| {
                                let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                                probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
                                probe
                                    .max_assigned
                                    .fetch_max(host.assigned_workers(), Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(3));
                                probe.in_flight.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            })?;
                        }
                        host.flush_children();
                        Ok(())
                    },
                    JobMetadata::new(
                        ExecutionInfo::new(QUOTA),
                        SecurityInfo::new("tester"),
                        OptimizationInfo::new(format!("island-{n}")),
                    ),
                )
                .expect("Failed to submit");
            (n, observed, job)
        })
        .collect();

    let jobs: Vec<_> = submitted.iter().map(|(_, _, job)| job.clone()).collect();

    // Sample every job's charge while they run.
    let mut sampled_max = 0;
    while jobs.iter().any(|job| !job.is_done()) {
        for job in &jobs {
            sampled_max = sampled_max.max(job.assigned_workers());
        }
        thread::sleep(Duration::from_micros(200));
    }
    for job in &jobs {
        assert!(job.wait_timeout(Duration::from_secs(10)));
    }

    for (n, probe, _) in &submitted {
        let in_flight = probe.max_in_flight.load(Ordering::SeqCst);
        let assigned = probe.max_assigned.load(Ordering::SeqCst);
        println!("job {n}: max in flight {in_flight}, max assigned {assigned}");
        assert!(in_flight <= QUOTA);
        assert!(assigned <= QUOTA);
        assert!(assigned >= 1);
    }
    println!("max sampled assignment: {sampled_max}");
    assert!(sampled_max <= QUOTA);

    let stats = scheduler.stats();
    assert_eq!(stats.submitted_jobs, JOBS as u64);
    assert_eq!(stats.executed_units, (JOBS * (CHILDREN + 1)) as u64);

    scheduler.abort();
    assert!(scheduler.wait_timeout(Duration::from_secs(10)));
    println!("=== test_quota_never_exceeded PASSED ===\n");
}

#[test]
fn test_quota_larger_than_pool_is_accepted() {
    let scheduler = Scheduler::with_worker_count(2).expect("Failed to create scheduler");
    scheduler.start().expect("Failed to start");

    let job = scheduler
        .submit(
            |host| {
                for _ in 0..8 {
                    host.spawn(|_| Ok(()))?;
                }
                Ok(())
            },
            JobMetadata::new(
                ExecutionInfo::new(64),
                SecurityInfo::new("tester"),
                OptimizationInfo::new("wide"),
            ),
        )
        .expect("Failed to submit");
    assert!(job.wait_timeout(Duration::from_secs(10)));
    assert!(!scheduler.contains_job(job.id()));

    scheduler.abort();
    assert!(scheduler.wait_timeout(Duration::from_secs(10)));
}
