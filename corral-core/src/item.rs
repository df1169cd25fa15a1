//! The work-item capability the scheduler depends on.

use core::fmt;
use std::sync::Arc;

/// An opaque, host-defined unit of work.
///
/// The scheduler only ever asks an item to run itself, whether it has been
/// queued before, and tells it when it was queued or abandoned; it never
/// inspects concrete types. An item the scheduler marked queued is run by
/// exactly one worker or cancelled, and never run inline. Implementations own
/// their execution faults: a panic escaping [`execute`](Self::execute) is
/// caught by the worker loop and logged, but recording the fault is the
/// item's responsibility.
pub trait WorkItem: Send + Sync + 'static {
    /// Run the item synchronously on the calling thread.
    ///
    /// The call occupies the thread until it returns.
    fn execute(&self);

    /// Run the item and report whether it actually ran.
    ///
    /// Items that can decline (already ran, cancelled) override this; the
    /// default always runs [`execute`](Self::execute).
    fn try_execute(&self) -> bool {
        self.execute();
        true
    }

    /// Whether the item has been placed in a scheduler queue before.
    fn was_previously_queued(&self) -> bool {
        false
    }

    /// Called by the scheduler before the item becomes visible to workers.
    fn mark_queued(&self) {}

    /// Called by the scheduler for an accepted item it will never run.
    fn cancel(&self) {}
}

/// Shared handle to a work item, as passed through the scheduler.
pub type WorkItemRef = Arc<dyn WorkItem>;

/// Lifecycle of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkItemState {
    /// Created, not yet handed to a scheduler
    Pending = 0,
    /// Accepted by a scheduler queue
    Queued = 1,
    /// Currently executing on some thread
    Running = 2,
    /// Finished without a fault
    Completed = 3,
    /// Finished with a fault
    Faulted = 4,
    /// Cancelled before it ran
    Cancelled = 5,
}

impl WorkItemState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted | Self::Cancelled)
    }

    /// Whether the item may still be started.
    #[must_use]
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Pending | Self::Queued)
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Queued,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Faulted,
            _ => Self::Cancelled,
        }
    }
}

impl fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Queued => write!(f, "Queued"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Faulted => write!(f, "Faulted"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}
