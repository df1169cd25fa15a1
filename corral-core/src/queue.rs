//! Bounded multi-producer multi-consumer work queue.
//!
//! The queue is the only synchronization point between submitters and
//! workers. It offers a non-blocking fast path plus two families of waiting
//! operations:
//!
//! - **Parking** (`enqueue_blocking`, `dequeue`): wait on a condition
//!   variable; a callback registered on the cancellation token wakes the
//!   waiter when the token fires.
//! - **Spinning** (`enqueue_spinning`, `dequeue_spinning`): poll the fast
//!   path with [`AdaptiveBackoff`] between attempts.
//!
//! # Behavior Guarantees
//! - `len() <= capacity()` at all times
//! - FIFO per producer; no global order across producers
//! - A failed enqueue always hands the item back, so nothing is ever left
//!   half-enqueued
//! - Cancellation wakes parked waiters promptly with `Cancelled`

use crate::backoff::AdaptiveBackoff;
use crate::cancel::{CancellationRegistration, CancellationToken};
use crate::error::{DequeueError, EnqueueError};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Shared<T> {
    fn wake_all(&self) {
        // Taking the lock orders this wake-up after any waiter's check.
        let _state = self.state.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// A fixed-capacity MPMC queue with cancellable waits.
///
/// Cloning yields another handle to the same queue.
pub struct BoundedWorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BoundedWorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> BoundedWorkQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than zero");
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity.min(4096)),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Try to enqueue without waiting.
    ///
    /// # Errors
    /// `Full` if the queue is at capacity, `Closed` if it no longer accepts
    /// writes. The item is returned inside the error.
    pub fn try_enqueue(&self, item: T) -> Result<(), EnqueueError<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(EnqueueError::Closed(item));
        }
        if state.items.len() >= self.shared.capacity {
            return Err(EnqueueError::Full(item));
        }
        state.items.push_back(item);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Enqueue, parking until space frees up.
    ///
    /// # Errors
    /// `Cancelled` if `token` fires first, `Closed` if the queue is closed
    /// while waiting. The item is returned inside the error.
    pub fn enqueue_blocking(&self, item: T, token: &CancellationToken) -> Result<(), EnqueueError<T>> {
        let mut registration: Option<CancellationRegistration> = None;
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(EnqueueError::Closed(item));
            }
            if token.is_cancelled() {
                return Err(EnqueueError::Cancelled(item));
            }
            if state.items.len() < self.shared.capacity {
                state.items.push_back(item);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            if registration.is_none() {
                match self.register_waker(token) {
                    Some(r) => registration = Some(r),
                    None => return Err(EnqueueError::Cancelled(item)),
                }
            }
            self.shared.not_full.wait(&mut state);
        }
    }

    /// Enqueue, spin-polling with adaptive back-off until space frees up.
    ///
    /// # Errors
    /// Same as [`enqueue_blocking`](Self::enqueue_blocking).
    pub fn enqueue_spinning(&self, mut item: T, token: &CancellationToken) -> Result<(), EnqueueError<T>> {
        let mut backoff = AdaptiveBackoff::new();
        loop {
            if token.is_cancelled() {
                return Err(EnqueueError::Cancelled(item));
            }
            match self.try_enqueue(item) {
                Ok(()) => return Ok(()),
                Err(EnqueueError::Full(rejected)) => {
                    item = rejected;
                    backoff.snooze();
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Take the oldest item without waiting.
    ///
    /// # Errors
    /// `Empty` if nothing is queued, `Closed` if the queue is closed and
    /// drained.
    pub fn try_dequeue(&self) -> Result<T, DequeueError> {
        let mut state = self.shared.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                self.shared.not_full.notify_one();
                Ok(item)
            }
            None if state.closed => Err(DequeueError::Closed),
            None => Err(DequeueError::Empty),
        }
    }

    /// Take the oldest item, parking until one is available.
    ///
    /// Cancellation is checked before every attempt, so a fired token wins
    /// over queued items.
    ///
    /// # Errors
    /// `Cancelled` if `token` fires, `Closed` if the queue is closed and
    /// drained.
    pub fn dequeue(&self, token: &CancellationToken) -> Result<T, DequeueError> {
        let mut registration: Option<CancellationRegistration> = None;
        let mut state = self.shared.state.lock();
        loop {
            if token.is_cancelled() {
                return Err(DequeueError::Cancelled);
            }
            if let Some(item) = state.items.pop_front() {
                self.shared.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(DequeueError::Closed);
            }
            if registration.is_none() {
                match self.register_waker(token) {
                    Some(r) => registration = Some(r),
                    None => return Err(DequeueError::Cancelled),
                }
            }
            self.shared.not_empty.wait(&mut state);
        }
    }

    /// Take the oldest item, spin-polling with adaptive back-off.
    ///
    /// # Errors
    /// Same as [`dequeue`](Self::dequeue).
    pub fn dequeue_spinning(&self, token: &CancellationToken) -> Result<T, DequeueError> {
        let mut backoff = AdaptiveBackoff::new();
        loop {
            if token.is_cancelled() {
                return Err(DequeueError::Cancelled);
            }
            match self.try_dequeue() {
                Ok(item) => return Ok(item),
                Err(DequeueError::Empty) => backoff.snooze(),
                Err(err) => return Err(err),
            }
        }
    }

    /// Stop accepting writes and wake every waiter.
    ///
    /// Returns `true` if this call closed the queue. Items already queued can
    /// still be dequeued.
    pub fn close(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
        true
    }

    /// Remove and return everything still queued.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.shared.state.lock();
        let drained: Vec<T> = state.items.drain(..).collect();
        self.shared.not_full.notify_all();
        drained
    }

    /// Whether the queue was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().items.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.shared.capacity
    }

    /// Maximum number of queued items.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn register_waker(&self, token: &CancellationToken) -> Option<CancellationRegistration> {
        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        token.on_cancel(move || {
            if let Some(shared) = weak.upgrade() {
                shared.wake_all();
            }
        })
    }
}

impl<T> fmt::Debug for BoundedWorkQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("BoundedWorkQueue")
            .field("len", &state.items.len())
            .field("capacity", &self.shared.capacity)
            .field("closed", &state.closed)
            .finish()
    }
}
