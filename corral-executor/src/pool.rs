//! Fixed-size pool of dedicated worker threads.
//!
//! Every worker runs the same loop: while the cancellation token has not
//! fired, take one item from the bounded queue and execute it to completion.
//! Cancellation is observed only at the top of the loop and inside the
//! queue wait, never in the middle of an item.
//!
//! # Behavior Guarantees
//! - Exactly `max_concurrency` workers, all spawned before `spawn` returns
//! - One item at a time per worker
//! - A panicking item is logged and the worker keeps going
//! - Membership is an explicit set of thread ids, fixed at construction

use crate::priority;
use crate::thread::TrackedThread;
use corral_core::job::panic_message;
use corral_core::{
    BoundedWorkQueue, CancellationToken, DequeueError, LinkedCancellation, SchedulerConfig,
    SchedulerResult, ThreadPriority, WaitPolicy, WorkItemRef,
};
use core::fmt;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, debug_span, error, warn};

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    /// Thread spawned, loop not yet entered
    Created = 0,
    /// Dequeuing and executing items
    Running = 1,
    /// Cancellation observed, leaving the loop
    Draining = 2,
    /// Loop exited
    Stopped = 3,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Outcome of joining the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    /// Workers that exited within the timeout
    pub joined: usize,
    /// Indices of workers abandoned after the timeout
    pub abandoned: Vec<usize>,
}

struct WorkerHandle {
    index: usize,
    thread: TrackedThread,
    state: Arc<AtomicU8>,
}

/// Everything a worker thread needs, moved into it at spawn.
struct WorkerContext {
    index: usize,
    queue: BoundedWorkQueue<WorkItemRef>,
    token: CancellationToken,
    policy: WaitPolicy,
    priority: ThreadPriority,
    state: Arc<AtomicU8>,
    live: Arc<AtomicUsize>,
}

/// Decrements the live-worker count and marks the worker stopped on exit,
/// including exit by unwinding.
struct ExitGuard {
    state: Arc<AtomicU8>,
    live: Arc<AtomicUsize>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.state.store(WorkerState::Stopped as u8, Ordering::Release);
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerContext {
    fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn run(self) {
        let _span = debug_span!("worker", index = self.index).entered();
        let _guard = ExitGuard {
            state: Arc::clone(&self.state),
            live: Arc::clone(&self.live),
        };

        if let Err(err) = priority::apply_to_current_thread(self.priority) {
            warn!(priority = %self.priority, error = %err, "could not apply worker thread priority");
        }

        self.set_state(WorkerState::Running);
        debug!(policy = %self.policy, "worker started");

        while !self.token.is_cancelled() {
            let next = match self.policy {
                WaitPolicy::Parking => self.queue.dequeue(&self.token),
                WaitPolicy::Spinning => self.queue.dequeue_spinning(&self.token),
            };
            match next {
                Ok(item) => execute(&item),
                Err(DequeueError::Empty) => continue,
                Err(DequeueError::Cancelled | DequeueError::Closed) => break,
            }
        }

        self.set_state(WorkerState::Draining);
        debug!("worker stopping");
    }
}

fn execute(item: &WorkItemRef) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| item.execute())) {
        error!(panic = %panic_message(payload.as_ref()), "work item panicked; worker continues");
    }
}

/// A fixed set of worker threads draining one bounded queue.
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    members: HashSet<ThreadId>,
    live: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `config.max_concurrency` workers draining `queue`.
    ///
    /// Workers stop when `cancellation`'s token fires. If a thread cannot be
    /// created, the link is fired, the workers already started are joined,
    /// and the error is returned.
    ///
    /// # Errors
    /// Returns `ThreadSpawn` if the OS refuses to create a worker thread.
    pub fn spawn(
        config: &SchedulerConfig,
        queue: &BoundedWorkQueue<WorkItemRef>,
        cancellation: &LinkedCancellation,
    ) -> SchedulerResult<Self> {
        let token = cancellation.token();
        let live = Arc::new(AtomicUsize::new(0));
        let mut pool = Self {
            workers: Vec::with_capacity(config.max_concurrency),
            members: HashSet::with_capacity(config.max_concurrency),
            live: Arc::clone(&live),
        };

        for index in 0..config.max_concurrency {
            let state = Arc::new(AtomicU8::new(WorkerState::Created as u8));
            let context = WorkerContext {
                index,
                queue: queue.clone(),
                token: token.clone(),
                policy: config.wait_policy,
                priority: config.priority,
                state: Arc::clone(&state),
                live: Arc::clone(&live),
            };

            live.fetch_add(1, Ordering::AcqRel);
            let name = format!("{}-{index}", config.thread_name_prefix);
            match TrackedThread::spawn(name, move || context.run()) {
                Ok(thread) => {
                    pool.members.insert(thread.id());
                    pool.workers.push(WorkerHandle { index, thread, state });
                }
                Err(err) => {
                    live.fetch_sub(1, Ordering::AcqRel);
                    error!(index, error = %err, "failed to spawn worker thread");
                    cancellation.cancel();
                    queue.close();
                    pool.join(config.shutdown_timeout);
                    return Err(err.into());
                }
            }
        }

        Ok(pool)
    }

    /// Whether the calling thread is one of this pool's workers.
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.contains(thread::current().id())
    }

    /// Whether `id` belongs to one of this pool's workers.
    #[must_use]
    pub fn contains(&self, id: ThreadId) -> bool {
        self.members.contains(&id)
    }

    /// Number of workers spawned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of workers whose loop has not exited.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Current state of every worker, by index.
    #[must_use]
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers
            .iter()
            .map(|w| WorkerState::from_u8(w.state.load(Ordering::Acquire)))
            .collect()
    }

    /// Wait up to `timeout` per worker for every worker to exit.
    ///
    /// Only meaningful after cancellation fired; workers still running past
    /// the timeout are abandoned, not terminated. When called from one of the
    /// pool's own workers, that worker is not waited on: it leaves its loop
    /// once the current item returns, and counts as joined.
    pub fn join(self, timeout: Duration) -> JoinReport {
        let mut report = JoinReport::default();
        let current = thread::current().id();
        for worker in self.workers {
            if worker.thread.id() == current {
                debug!(index = worker.index, "join called from this worker; detaching it");
                report.joined += 1;
            } else if worker.thread.join_timeout(timeout) {
                report.joined += 1;
            } else {
                warn!(
                    index = worker.index,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "worker did not stop in time; abandoning it"
                );
                report.abandoned.push(worker.index);
            }
        }
        report
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("live", &self.live_workers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{CancellationToken, Job, WorkItem};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn pool_with(workers: usize, policy: WaitPolicy) -> (WorkerPool, BoundedWorkQueue<WorkItemRef>, LinkedCancellation) {
        let mut config = SchedulerConfig::with_concurrency(workers);
        config.wait_policy = policy;
        config.thread_name_prefix = "pool-test".into();
        let queue = BoundedWorkQueue::new(config.queue_capacity().unwrap());
        let link = LinkedCancellation::new([&CancellationToken::none()]);
        let pool = WorkerPool::spawn(&config, &queue, &link).unwrap();
        (pool, queue, link)
    }

    fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_spawns_exact_worker_count() {
        let (pool, _queue, link) = pool_with(3, WaitPolicy::Parking);
        assert_eq!(pool.len(), 3);
        assert!(wait_until(Duration::from_secs(1), || pool
            .worker_states()
            .iter()
            .all(|s| *s == WorkerState::Running)));
        assert!(!pool.is_member());

        link.cancel();
        let report = pool.join(Duration::from_secs(1));
        assert_eq!(report.joined, 3);
        assert!(report.abandoned.is_empty());
    }

    #[test]
    fn test_executes_queued_items() {
        for policy in [WaitPolicy::Parking, WaitPolicy::Spinning] {
            let (pool, queue, link) = pool_with(2, policy);
            let hits = Arc::new(AtomicUsize::new(0));
            let jobs: Vec<_> = (0..20)
                .map(|_| {
                    let h = hits.clone();
                    Job::new(move || {
                        h.fetch_add(1, Ordering::SeqCst);
                    })
                })
                .collect();
            for job in &jobs {
                queue.try_enqueue(job.clone() as WorkItemRef).unwrap();
            }
            for job in &jobs {
                job.wait_timeout(Duration::from_secs(2)).unwrap();
            }
            assert_eq!(hits.load(Ordering::SeqCst), 20);

            link.cancel();
            assert_eq!(pool.join(Duration::from_secs(1)).joined, 2);
        }
    }

    #[test]
    fn test_worker_survives_panicking_item() {
        struct Explodes;
        impl WorkItem for Explodes {
            fn execute(&self) {
                panic!("item bug");
            }
        }

        let (pool, queue, link) = pool_with(1, WaitPolicy::Parking);
        queue.try_enqueue(Arc::new(Explodes) as WorkItemRef).unwrap();
        let after = Job::new(|| {});
        queue.try_enqueue(after.clone() as WorkItemRef).unwrap();

        assert!(after.wait_timeout(Duration::from_secs(2)).is_ok());
        assert_eq!(pool.live_workers(), 1);

        link.cancel();
        assert_eq!(pool.join(Duration::from_secs(1)).joined, 1);
    }

    #[test]
    fn test_membership_visible_from_worker() {
        let (pool, queue, link) = pool_with(2, WaitPolicy::Parking);
        let (tx, rx) = crossbeam_channel::bounded(1);
        queue
            .try_enqueue(Job::new(move || {
                tx.send(thread::current().id()).unwrap();
            }) as WorkItemRef)
            .unwrap();

        let worker_id = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(pool.contains(worker_id));
        assert!(!pool.contains(thread::current().id()));

        link.cancel();
        pool.join(Duration::from_secs(1));
    }

    #[test]
    fn test_join_from_own_worker_does_not_wait() {
        let mut config = SchedulerConfig::with_concurrency(2);
        config.thread_name_prefix = "pool-self-join".into();
        let queue = BoundedWorkQueue::new(config.queue_capacity().unwrap());
        let link = LinkedCancellation::new([&CancellationToken::none()]);
        let pool = WorkerPool::spawn(&config, &queue, &link).unwrap();

        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let (pool_tx, pool_rx) = crossbeam_channel::bounded::<WorkerPool>(1);
        let (report_tx, report_rx) = crossbeam_channel::bounded(1);
        let token = link.token();
        queue
            .try_enqueue(Job::new(move || {
                started_tx.send(()).unwrap();
                let pool = pool_rx.recv().unwrap();
                assert!(pool.is_member());
                let start = Instant::now();
                // Cancellation has fired; only the calling worker is still busy.
                let report = pool.join(Duration::from_secs(2));
                let _ = report_tx.send((report, start.elapsed(), token.is_cancelled()));
            }) as WorkItemRef)
            .unwrap();

        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        link.cancel();
        pool_tx.send(pool).unwrap();
        let (report, elapsed, cancelled) = report_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(cancelled);
        assert_eq!(report.joined, 2);
        assert!(report.abandoned.is_empty());
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_cancel_stops_idle_workers_promptly() {
        let (pool, _queue, link) = pool_with(4, WaitPolicy::Parking);
        assert!(wait_until(Duration::from_secs(1), || pool.live_workers() == 4));

        let start = Instant::now();
        link.cancel();
        assert!(wait_until(Duration::from_millis(500), || pool.live_workers() == 0));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(pool.worker_states().iter().all(|s| *s == WorkerState::Stopped));
        assert_eq!(pool.join(Duration::from_secs(1)).joined, 4);
    }
}
