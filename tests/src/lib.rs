//! Integration tests for the Corral bounded scheduler.

#[cfg(test)]
mod property_tests;

/// End-to-end behavior of the scheduler through the public API.
#[cfg(test)]
mod integration_tests {
    use corral::{
        BoundedScheduler, CancellationSource, Corral, Job, JobError, SubmitOutcome, WaitPolicy,
        WorkItem, WorkItemRef,
    };
    use parking_lot::Mutex;
    use std::hint::black_box;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn scheduler(workers: usize, factor: usize, policy: WaitPolicy) -> BoundedScheduler {
        BoundedScheduler::builder()
            .max_concurrency(workers)
            .queue_capacity_factor(factor)
            .wait_policy(policy)
            .thread_name_prefix("it-worker")
            .build()
            .unwrap()
    }

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

    fn wait_all(jobs: &[Arc<Job>]) {
        for job in jobs {
            assert!(job.wait_timeout(Duration::from_secs(10)).is_ok());
        }
    }

    #[test]
    fn test_submissions_within_capacity_run_once() {
        let scheduler = scheduler(3, 4, WaitPolicy::Parking);
        let capacity = scheduler.queue_capacity();
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..capacity).map(|_| AtomicUsize::new(0)).collect());

        let jobs: Vec<_> = (0..capacity)
            .map(|i| {
                let hits = hits.clone();
                Job::new(move || {
                    hits[i].fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for job in &jobs {
            assert_eq!(scheduler.submit(job.clone()), SubmitOutcome::Enqueued);
        }

        wait_all(&jobs);
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
        assert!(scheduler.shutdown().is_clean());
    }

    #[test]
    fn test_ten_thousand_submissions() {
        for policy in [WaitPolicy::Parking, WaitPolicy::Spinning] {
            let scheduler = scheduler(4, 8, policy);
            let executed = Arc::new(AtomicUsize::new(0));

            let jobs: Vec<_> = (0..10_000)
                .map(|_| {
                    let executed = executed.clone();
                    Job::new(move || {
                        executed.fetch_add(1, Ordering::Relaxed);
                    })
                })
                .collect();
            for job in &jobs {
                assert_ne!(scheduler.submit(job.clone()), SubmitOutcome::Dropped);
            }

            wait_all(&jobs);
            assert_eq!(executed.load(Ordering::SeqCst), 10_000);
            let report = scheduler.shutdown();
            assert_eq!(report.discarded, 0);
        }
    }

    #[test]
    fn test_concurrent_producers_exactly_once() {
        let scheduler = Arc::new(scheduler(4, 2, WaitPolicy::Parking));
        let executed = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                let executed = executed.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|_| {
                            let executed = executed.clone();
                            let job = Job::new(move || {
                                executed.fetch_add(1, Ordering::Relaxed);
                            });
                            scheduler.submit(job.clone());
                            job
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for producer in producers {
            wait_all(&producer.join().unwrap());
        }
        assert_eq!(executed.load(Ordering::SeqCst), 2_000);
    }

    #[test]
    fn test_panicking_item_is_isolated() {
        let runtime = Corral::builder().max_concurrency(1).build().unwrap();
        let bad = runtime.spawn(|| panic!("boom"));
        let good = runtime.spawn(|| {});

        assert!(matches!(bad.wait_timeout(Duration::from_secs(2)), Err(JobError::Faulted(m)) if m == "boom"));
        assert!(good.wait_timeout(Duration::from_secs(2)).is_ok());
        assert_eq!(runtime.scheduler().live_workers(), 1);
    }

    #[test]
    fn test_foreign_panic_keeps_worker_alive() {
        struct RawPanic;
        impl WorkItem for RawPanic {
            fn execute(&self) {
                panic!("raw item");
            }
        }

        let scheduler = scheduler(1, 4, WaitPolicy::Parking);
        scheduler.submit(Arc::new(RawPanic));
        let after = Job::new(|| {});
        scheduler.submit(after.clone());

        assert!(after.wait_timeout(Duration::from_secs(2)).is_ok());
        assert_eq!(scheduler.live_workers(), 1);
    }

    #[test]
    fn test_submit_after_shutdown_does_not_grow_queue() {
        let runtime = Corral::builder().max_concurrency(2).build().unwrap();
        let handle = runtime.clone();
        assert!(runtime.shutdown().is_none());

        for _ in 0..100 {
            let item: WorkItemRef = Job::new(|| {});
            assert_eq!(handle.submit(item), SubmitOutcome::Dropped);
            assert_eq!(handle.scheduler().queued_len(), 0);
        }
    }

    #[test]
    fn test_spin_overflow_unblocks_after_dequeue() {
        // One worker, capacity 2: occupy the worker, fill the queue, then
        // the next submit must wait until the worker dequeues.
        let scheduler = Arc::new(scheduler(1, 2, WaitPolicy::Spinning));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);

        scheduler.submit(Job::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let queued: Vec<_> = (0..2).map(|_| Job::new(|| {})).collect();
        for job in &queued {
            assert_eq!(scheduler.submit(job.clone()), SubmitOutcome::Enqueued);
        }
        assert_eq!(scheduler.queued_len(), scheduler.queue_capacity());

        let overflow = Job::new(|| {});
        let submitter = {
            let scheduler = scheduler.clone();
            let overflow = overflow.clone();
            thread::spawn(move || scheduler.submit(overflow))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!submitter.is_finished());
        assert_eq!(scheduler.live_workers(), 1);

        drop(release_tx);
        assert_eq!(submitter.join().unwrap(), SubmitOutcome::Enqueued);
        wait_all(&queued);
        assert!(overflow.wait_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_external_cancellation_idle_workers_exit() {
        for policy in [WaitPolicy::Parking, WaitPolicy::Spinning] {
            let source = CancellationSource::new();
            let scheduler = BoundedScheduler::builder()
                .max_concurrency(4)
                .wait_policy(policy)
                .cancellation_token(source.token())
                .build()
                .unwrap();
            thread::sleep(Duration::from_millis(20));
            assert_eq!(scheduler.live_workers(), 4);

            let start = Instant::now();
            source.cancel();
            while scheduler.live_workers() > 0 && start.elapsed() < Duration::from_secs(1) {
                thread::sleep(Duration::from_millis(1));
            }
            assert_eq!(scheduler.live_workers(), 0);
            assert!(start.elapsed() < Duration::from_millis(150), "{policy}: {:?}", start.elapsed());

            let report = scheduler.shutdown();
            assert_eq!(report.joined, 4);
            assert!(report.is_clean());
        }
    }

    #[test]
    fn test_four_workers_run_four_items_in_parallel() {
        // CPU-bound items need four cores to overlap.
        if thread::available_parallelism().map_or(1, usize::from) < 4 {
            return;
        }

        let scheduler = scheduler(4, 4, WaitPolicy::Parking);
        let jobs: Vec<_> = (0..4)
            .map(|_| {
                Job::new(|| {
                    black_box(cpu_spin(Duration::from_millis(200)));
                })
            })
            .collect();

        let start = Instant::now();
        for job in &jobs {
            scheduler.submit(job.clone());
        }
        wait_all(&jobs);
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
    }

    #[test]
    fn test_third_item_waits_for_free_worker() {
        let scheduler = scheduler(2, 4, WaitPolicy::Parking);
        let spans = Arc::new(Mutex::new(vec![None; 3]));

        let jobs: Vec<_> = (0..3)
            .map(|i| {
                let spans = spans.clone();
                Job::new(move || {
                    let started = Instant::now();
                    thread::sleep(Duration::from_millis(100));
                    spans.lock()[i] = Some((started, Instant::now()));
                })
            })
            .collect();
        for job in &jobs {
            scheduler.submit(job.clone());
        }
        wait_all(&jobs);

        let spans: Vec<_> = spans.lock().iter().map(|s| s.unwrap()).collect();
        let first_finish = spans[0].1.min(spans[1].1);
        assert!(spans[2].0 >= first_finish);
    }

    #[test]
    fn test_nested_inline_execution_on_worker() {
        let runtime = Corral::builder().max_concurrency(1).build().unwrap();
        let ran_inline = Arc::new(AtomicUsize::new(0));

        let outer = {
            let handle = runtime.clone();
            let ran_inline = ran_inline.clone();
            runtime.spawn(move || {
                // With a single worker busy here, a queued child could never
                // run before this item returns; inline execution avoids that.
                let child = Job::new(|| {});
                if handle.run_inline(child.as_ref()) {
                    ran_inline.fetch_add(1, Ordering::SeqCst);
                }
                assert!(child.is_finished());
            })
        };

        assert!(outer.wait_timeout(Duration::from_secs(2)).is_ok());
        assert_eq!(ran_inline.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_waits_for_running_item() {
        let scheduler = scheduler(2, 4, WaitPolicy::Parking);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let job = Job::new(move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(50));
        });
        scheduler.submit(job.clone());
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        drop(scheduler);
        assert!(job.is_finished());
    }
}
