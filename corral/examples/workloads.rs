//! Mixed IO-style and CPU-bound workloads through a bounded scheduler.
//!
//! Run with `RUST_LOG=corral_executor=debug` to see worker lifecycle events.

use corral::{Corral, JobError, ThreadPriority, WaitPolicy};
use std::hint::black_box;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

const IO_JOBS: usize = 128;
const CPU_JOBS: usize = 512;
const CPU_SLICE: Duration = Duration::from_millis(200);

/// Busy-spin the calling thread for roughly `budget`.
fn cpu_spin(budget: Duration) -> u64 {
    let start = Instant::now();
    let mut acc = 0u64;
    while start.elapsed() < budget {
        for i in 0..1_000u64 {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    acc
}

/// Simulated IO: short sleeps interleaved with yields.
fn io_wait(rounds: u32) {
    for _ in 0..rounds {
        thread::sleep(Duration::from_millis(2));
        thread::yield_now();
    }
}

fn run(policy: WaitPolicy) -> Result<(), Box<dyn std::error::Error>> {
    let workers = thread::available_parallelism().map_or(4, usize::from);
    let runtime = Corral::builder()
        .max_concurrency(workers)
        .wait_policy(policy)
        .priority(ThreadPriority::BelowNormal)
        .queue_capacity_factor(16)
        .build()?;

    let start = Instant::now();
    let mut jobs = Vec::with_capacity(IO_JOBS + CPU_JOBS);
    for _ in 0..IO_JOBS {
        jobs.push(runtime.spawn(|| io_wait(10)));
    }
    for _ in 0..CPU_JOBS {
        jobs.push(runtime.spawn(|| {
            black_box(cpu_spin(CPU_SLICE / 40));
        }));
    }

    let mut faulted = 0usize;
    for job in &jobs {
        match job.wait() {
            Ok(()) => {}
            Err(JobError::Faulted(message)) => {
                faulted += 1;
                tracing::warn!(job = %job.id(), %message, "job faulted");
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(
        %policy,
        workers,
        jobs = jobs.len(),
        faulted,
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "workload finished"
    );

    if let Some(report) = runtime.shutdown() {
        info!(joined = report.joined, discarded = report.discarded, "runtime stopped");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run(WaitPolicy::Parking)?;
    run(WaitPolicy::Spinning)?;
    Ok(())
}
