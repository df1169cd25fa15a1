//! Named OS threads that can be joined with a timeout.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::warn;

/// A spawned thread plus a channel that disconnects when it exits.
///
/// `std` offers no timed join; the exit channel provides one. The sender is
/// owned by the thread's closure, so it drops on normal return and on unwind.
pub(crate) struct TrackedThread {
    handle: JoinHandle<()>,
    exited: Receiver<()>,
}

impl TrackedThread {
    pub(crate) fn spawn<F>(name: String, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (exit_tx, exited) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new().name(name).spawn(move || {
            let _exit = exit_tx;
            body();
        })?;
        Ok(Self { handle, exited })
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if it did not; the handle is then dropped, which
    /// detaches the thread instead of killing it.
    pub(crate) fn join_timeout(self, timeout: Duration) -> bool {
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let name = self.handle.thread().name().map(str::to_owned);
                if self.handle.join().is_err() {
                    warn!(thread = ?name, "thread terminated by panic");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}
