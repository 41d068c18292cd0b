use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use lockstore::StorageManager;
use lockstore::config::Config;
use sketches_ddsketch::DDSketch;

use crate::workloads::{PreparedWorkload, WorkloadsConfig, prepare_workload};

#[derive(Default)]
struct WorkerStats {
    durations: DDSketch,
    failures: usize,
    cancellations: usize,
}

impl WorkerStats {
    fn merge(&mut self, other: WorkerStats) -> Result<()> {
        self.durations
            .merge(&other.durations)
            .map_err(|_| anyhow::anyhow!("failed to merge operation durations"))?;
        self.failures += other.failures;
        self.cancellations += other.cancellations;
        Ok(())
    }
}

pub fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let manager = StorageManager::from_config(&config.manager);
    tracing::info!(manager = %manager, "starting stresstest");

    let workloads = workloads
        .workloads
        .iter()
        .map(|workload| prepare_workload(&manager, workload))
        .collect::<Result<Vec<_>>>()?;

    let start = Instant::now();
    let deadline = start + duration;

    // run the workloads concurrently
    let results = thread::scope(|scope| {
        let tasks: Vec<_> = workloads
            .iter()
            .map(|workload| scope.spawn(move || run_workload(workload, deadline)))
            .collect();

        tasks
            .into_iter()
            .map(|task| match task.join() {
                Ok(stats) => stats,
                Err(_) => anyhow::bail!("a workload panicked"),
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let elapsed = start.elapsed();
    let mut violations = 0;

    for (i, (workload, stats)) in workloads.iter().zip(results).enumerate() {
        let concurrency = workload.concurrency;
        let ops = stats.durations.count();
        let ops_ps = ops as f64 / elapsed.as_secs_f64();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        let computations = workload.work.computations();
        let failures = stats.failures;
        let cancellations = stats.cancellations;
        let keys = workload.keys;
        println!(
            "  keys: {keys}; computations: {computations}; \
             failures: {failures}; cancellations: {cancellations}"
        );

        if let (Some(sum), Some(p50), Some(p90), Some(p99)) = (
            stats.durations.sum(),
            stats.durations.quantile(0.5).ok().flatten(),
            stats.durations.quantile(0.9).ok().flatten(),
            stats.durations.quantile(0.99).ok().flatten(),
        ) {
            let avg = Duration::from_secs_f64(sum / ops as f64);
            let p50 = Duration::from_secs_f64(p50);
            let p90 = Duration::from_secs_f64(p90);
            let p99 = Duration::from_secs_f64(p99);
            println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }

        let workload_violations = workload.work.violations();
        if workload_violations > 0 {
            tracing::error!(
                workload = i,
                keys = workload_violations,
                "keys were computed more than once",
            );
        }
        violations += workload_violations;
    }

    anyhow::ensure!(
        violations == 0,
        "{violations} keys were computed more than once"
    );
    Ok(())
}

fn run_workload(workload: &PreparedWorkload, deadline: Instant) -> Result<WorkerStats> {
    thread::scope(|scope| {
        let workers: Vec<_> = (0..workload.concurrency)
            .map(|worker| scope.spawn(move || run_worker(workload, worker, deadline)))
            .collect();

        let mut stats = WorkerStats::default();
        for worker in workers {
            match worker.join() {
                Ok(worker) => stats.merge(worker)?,
                Err(_) => anyhow::bail!("a worker panicked"),
            }
        }
        Ok(stats)
    })
}

fn run_worker(workload: &PreparedWorkload, worker: usize, deadline: Instant) -> WorkerStats {
    let mut stats = WorkerStats::default();
    // Workers walk the keys with different strides so they collide on some of them.
    let stride = 2 * worker + 1;
    let mut key = worker % workload.keys;

    while Instant::now() < deadline {
        let op_start = Instant::now();
        match workload.process_key(key) {
            Ok(_) => {}
            Err(err) if err.is_cancellation() => stats.cancellations += 1,
            Err(_) => stats.failures += 1,
        }
        stats.durations.add(op_start.elapsed().as_secs_f64());
        key = (key + stride) % workload.keys;
    }

    stats
}
