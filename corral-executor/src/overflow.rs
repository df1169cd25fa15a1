//! Auxiliary producers for the offload overflow policy.
//!
//! When the queue is full under [`WaitPolicy::Parking`](corral_core::WaitPolicy),
//! the scheduler wraps the blocking enqueue in an [`OverflowTask`] and hands
//! it to an [`OverflowProducer`], so the submitting thread returns at once.

use crate::thread::TrackedThread;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// A deferred enqueue handed to an overflow producer.
pub type OverflowTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs deferred enqueues off the submitting thread.
///
/// Implementations must eventually run or drop every task they accept.
/// Dropping a task without running it discards the submission it carries.
/// A producer that runs tasks one at a time in arrival order preserves
/// per-producer FIFO; a concurrent one does not.
pub trait OverflowProducer: Send + Sync + 'static {
    /// Accept a deferred enqueue.
    fn offload(&self, task: OverflowTask);
}

/// A single dedicated thread that runs overflow tasks in arrival order.
pub struct DedicatedOverflowThread {
    sender: Mutex<Option<Sender<OverflowTask>>>,
    thread: Mutex<Option<TrackedThread>>,
}

impl DedicatedOverflowThread {
    /// Spawn the producer thread.
    ///
    /// # Errors
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn(name: String) -> io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<OverflowTask>();
        let thread = TrackedThread::spawn(name, move || {
            debug!("overflow producer started");
            for task in receiver {
                task();
            }
            debug!("overflow producer stopped");
        })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.sender.lock().as_ref().map_or(0, Sender::len)
    }

    /// Stop accepting tasks and wait up to `timeout` for the thread to exit.
    ///
    /// Tasks already accepted still run. Returns `false` if the thread had
    /// to be abandoned.
    pub fn stop(&self, timeout: Duration) -> bool {
        drop(self.sender.lock().take());
        match self.thread.lock().take() {
            Some(thread) => thread.join_timeout(timeout),
            None => true,
        }
    }
}

impl OverflowProducer for DedicatedOverflowThread {
    fn offload(&self, task: OverflowTask) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => {
                if sender.send(task).is_err() {
                    warn!("overflow producer exited; submission discarded");
                }
            }
            None => warn!("overflow producer stopped; submission discarded"),
        }
    }
}

impl Drop for DedicatedOverflowThread {
    fn drop(&mut self) {
        // Detach rather than block if nobody called `stop`.
        drop(self.sender.get_mut().take());
    }
}
