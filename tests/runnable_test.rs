//! Stateful bodies through the `Runnable` trait

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evo_jobs::core::{AppResult, Host, OptimizationInfo, Runnable, Scheduler, SecurityInfo};
use serde_json::json;

/// Evaluates a population by spawning one sub-job per individual.
struct EvaluatePopulation {
    population: Vec<Vec<u64>>,
    total: Arc<AtomicU64>,
}

/// Fitness of one individual: the sum of its genes.
struct EvaluateIndividual {
    genes: Vec<u64>,
    total: Arc<AtomicU64>,
}

impl Runnable for EvaluateIndividual {
    fn run(self, _host: &Host) -> AppResult<()> {
        let fitness: u64 = self.genes.iter().sum();
        self.total.fetch_add(fitness, Ordering::SeqCst);
        Ok(())
    }
}

impl Runnable for EvaluatePopulation {
    fn run(self, host: &Host) -> AppResult<()> {
        let size = host
            .job_metadata()
            .optimization
            .parameter("population_size")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        anyhow::ensure!(size == self.population.len() as u64, "population size mismatch");

        for genes in self.population {
            host.spawn_runnable(EvaluateIndividual {
                genes,
                total: Arc::clone(&self.total),
            })?;
        }
        host.flush_children();
        Ok(())
    }
}

#[test]
fn test_runnable_job_with_runnable_children() {
    let scheduler = Scheduler::with_worker_count(3).unwrap();
    scheduler.start().unwrap();

    let total = Arc::new(AtomicU64::new(0));
    let population: Vec<Vec<u64>> = (1..=10).map(|n| vec![n; 3]).collect();
    let job = scheduler
        .job()
        .max_workers(3)
        .security(SecurityInfo::new("tester"))
        .optimization(
            OptimizationInfo::new("onemax").with_parameters(json!({ "population_size": 10 })),
        )
        .submit_runnable(EvaluatePopulation {
            population,
            total: Arc::clone(&total),
        })
        .unwrap();

    assert!(job.wait_timeout(Duration::from_secs(10)));
    // 3 * (1 + 2 + ... + 10)
    assert_eq!(total.load(Ordering::SeqCst), 165);
    assert_eq!(scheduler.stats().failed_units, 0);

    scheduler.abort();
    assert!(scheduler.wait_timeout(Duration::from_secs(10)));
}
