//! Shared workloads for the Corral benchmarks.

use corral::{BoundedScheduler, Job};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

/// A small deterministic CPU-bound computation.
#[must_use]
pub fn spin_work(iterations: u64) -> u64 {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = black_box(acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i));
    }
    acc
}

/// Submit `count` jobs to `scheduler` and wait for all of them.
pub fn run_batch(scheduler: &BoundedScheduler, count: usize, iterations: u64) {
    let jobs: Vec<Arc<Job>> = (0..count)
        .map(|_| {
            let job = Job::new(move || {
                black_box(spin_work(iterations));
            });
            scheduler.submit(job.clone());
            job
        })
        .collect();
    for job in jobs {
        let _ = job.wait();
    }
}

/// Baseline: one OS thread per item.
pub fn run_thread_per_item(count: usize, iterations: u64) {
    let handles: Vec<_> = (0..count)
        .map(|_| thread::spawn(move || black_box(spin_work(iterations))))
        .collect();
    for handle in handles {
        let _ = handle.join();
    }
}
