//! Property-based tests for ordering and the inline-execution rule.

use corral::{BoundedScheduler, Job, WaitPolicy, WorkItem};
use parking_lot::Mutex;
use proptest::prelude::*;
use quickcheck::quickcheck;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

fn single_worker(factor: usize, policy: WaitPolicy) -> BoundedScheduler {
    BoundedScheduler::builder()
        .max_concurrency(1)
        .queue_capacity_factor(factor)
        .wait_policy(policy)
        .thread_name_prefix("prop-worker")
        .build()
        .unwrap()
}

/// Run every producer's items through a one-worker scheduler and return the
/// `(producer, sequence)` pairs in execution order.
fn execution_order(producers: usize, per_producer: usize, factor: usize, policy: WaitPolicy) -> Vec<(usize, usize)> {
    let scheduler = Arc::new(single_worker(factor, policy));
    let order = Arc::new(Mutex::new(Vec::with_capacity(producers * per_producer)));

    let handles: Vec<_> = (0..producers)
        .map(|producer| {
            let scheduler = scheduler.clone();
            let order = order.clone();
            thread::spawn(move || {
                (0..per_producer)
                    .map(|seq| {
                        let order = order.clone();
                        let job = Job::new(move || order.lock().push((producer, seq)));
                        scheduler.submit(job.clone());
                        job
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for job in handle.join().unwrap() {
            job.wait_timeout(Duration::from_secs(10)).unwrap();
        }
    }
    let order = order.lock().clone();
    order
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: each producer's items run in submission order, including
    /// when the queue is full and submissions take the overflow path.
    #[test]
    fn prop_per_producer_fifo(
        producers in 1usize..4,
        per_producer in 1usize..48,
        factor in 1usize..4,
        spinning in any::<bool>(),
    ) {
        let policy = if spinning { WaitPolicy::Spinning } else { WaitPolicy::Parking };
        let order = execution_order(producers, per_producer, factor, policy);

        prop_assert_eq!(order.len(), producers * per_producer);
        for producer in 0..producers {
            let seqs: Vec<_> = order.iter().filter(|(p, _)| *p == producer).map(|(_, s)| *s).collect();
            prop_assert_eq!(seqs, (0..per_producer).collect::<Vec<_>>());
        }
    }
}

/// Shared scheduler for the quickcheck properties, which take plain fns.
fn shared() -> &'static BoundedScheduler {
    static SCHEDULER: OnceLock<BoundedScheduler> = OnceLock::new();
    SCHEDULER.get_or_init(|| {
        BoundedScheduler::builder()
            .max_concurrency(2)
            .thread_name_prefix("qc-worker")
            .build()
            .unwrap()
    })
}

/// Ask for inline execution from a worker (or the test thread) and report
/// whether it was granted and whether the item actually ran.
fn attempt_inline(previously_queued: bool, on_worker: bool) -> (bool, bool) {
    let scheduler = shared();
    let item = Job::new(|| {});

    let granted = if on_worker {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let checker = {
            let item = item.clone();
            Job::new(move || {
                let _ = tx.send(shared().try_run_inline(item.as_ref(), previously_queued));
            })
        };
        scheduler.submit(checker);
        rx.recv_timeout(Duration::from_secs(5)).unwrap_or(false)
    } else {
        scheduler.try_run_inline(item.as_ref(), previously_queued)
    };
    (granted, item.is_finished())
}

quickcheck! {
    fn qc_inline_only_for_fresh_items_on_workers(previously_queued: bool, on_worker: bool) -> bool {
        let (granted, ran) = attempt_inline(previously_queued, on_worker);
        granted == (!previously_queued && on_worker) && ran == granted
    }

    fn qc_queued_item_never_runs_inline(repeat: u8) -> bool {
        let scheduler = shared();
        (0..=repeat % 4).all(|_| {
            let item = Job::new(|| {});
            scheduler.submit(item.clone());
            item.wait_timeout(Duration::from_secs(5)).is_ok()
                && item.was_previously_queued()
                && !scheduler.try_run_inline(item.as_ref(), item.was_previously_queued())
        })
    }
}
