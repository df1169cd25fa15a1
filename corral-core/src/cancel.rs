//! Fire-once cooperative cancellation.
//!
//! A [`CancellationSource`] owns the right to fire; any number of
//! [`CancellationToken`]s observe it. Tokens can register callbacks that run
//! exactly once when the source fires, which is how blocking waits in the
//! work queue get woken up. [`LinkedCancellation`] merges caller-supplied
//! tokens with an internally owned source into a single signal.
//!
//! # Behavior Guarantees
//! - Firing is irreversible; there is no reset
//! - Each registered callback runs at most once, on the firing thread
//! - Callbacks never run while the registration lock is held

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    cancelled: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

impl Inner {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) -> bool {
        let fired = {
            let mut callbacks = self.callbacks.lock();
            // The flag flips under the lock so a concurrent registration
            // either lands before the drain or observes the fired flag.
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut callbacks.entries)
        };

        for (_, callback) in fired {
            callback();
        }
        true
    }

    fn register(self: &Arc<Self>, callback: Callback) -> Option<CancellationRegistration> {
        let mut callbacks = self.callbacks.lock();
        if self.is_cancelled() {
            return None;
        }
        let id = callbacks.next_id;
        callbacks.next_id += 1;
        callbacks.entries.push((id, callback));
        Some(CancellationRegistration {
            inner: Arc::downgrade(self),
            id,
        })
    }

    fn unregister(&self, id: u64) {
        let mut callbacks = self.callbacks.lock();
        callbacks.entries.retain(|(entry, _)| *entry != id);
    }
}

/// The owning side of a cancellation signal.
pub struct CancellationSource {
    inner: Arc<Inner>,
}

impl CancellationSource {
    /// Create a new, unfired source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Get a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }

    /// Fire the signal.
    ///
    /// Returns `true` if this call fired it, `false` if it had already fired.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    /// Check whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// An observer of a cancellation signal.
///
/// The default token is never cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Option<Arc<Inner>>,
}

impl CancellationToken {
    /// A token that never fires.
    #[must_use]
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Check whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.is_cancelled())
    }

    /// Whether this token is attached to a source at all.
    #[must_use]
    pub fn can_be_cancelled(&self) -> bool {
        self.inner.is_some()
    }

    /// Register a callback to run when the signal fires.
    ///
    /// Returns `None` without running `callback` if the signal has already
    /// fired; callers treat that as "cancelled". Dropping the returned
    /// registration removes the callback.
    pub fn on_cancel<F>(&self, callback: F) -> Option<CancellationRegistration>
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.inner {
            Some(inner) => inner.register(Box::new(callback)),
            None => Some(CancellationRegistration {
                inner: Weak::new(),
                id: 0,
            }),
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("can_be_cancelled", &self.can_be_cancelled())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle for a callback registered with [`CancellationToken::on_cancel`].
///
/// Dropping it unregisters the callback if it has not run yet.
#[must_use = "dropping the registration immediately unregisters the callback"]
pub struct CancellationRegistration {
    inner: Weak<Inner>,
    id: u64,
}

impl Drop for CancellationRegistration {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unregister(self.id);
        }
    }
}

/// A fire-once signal linked to any number of parent tokens.
///
/// The linked token fires when [`cancel`](Self::cancel) is called on the
/// link itself or when any parent fires. Parent registrations are held until
/// the link is released or dropped, so release it only after every observer
/// of [`token`](Self::token) has stopped waiting on it.
pub struct LinkedCancellation {
    source: CancellationSource,
    parents: Vec<CancellationRegistration>,
}

impl LinkedCancellation {
    /// Link an internally owned source with the given parent tokens.
    pub fn new<'a, I>(parents: I) -> Self
    where
        I: IntoIterator<Item = &'a CancellationToken>,
    {
        let source = CancellationSource::new();
        let mut registrations = Vec::new();

        for parent in parents {
            let child = Arc::clone(&source.inner);
            match parent.on_cancel(move || {
                child.cancel();
            }) {
                Some(registration) => registrations.push(registration),
                None => {
                    source.cancel();
                }
            }
        }

        Self {
            source,
            parents: registrations,
        }
    }

    /// Get the merged token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.source.token()
    }

    /// Fire the internally owned side of the link.
    pub fn cancel(&self) -> bool {
        self.source.cancel()
    }

    /// Check whether the merged signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }

    /// Detach from all parent tokens.
    pub fn release(self) {
        drop(self);
    }

    /// Number of parents still linked.
    #[must_use]
    pub fn linked_parents(&self) -> usize {
        self.parents.len()
    }
}

impl fmt::Debug for LinkedCancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedCancellation")
            .field("cancelled", &self.is_cancelled())
            .field("parents", &self.parents.len())
            .finish()
    }
}
