//! Best-effort OS priority for worker threads.

use corral_core::ThreadPriority;
use std::io;

/// Apply `priority` to the calling thread.
///
/// `Normal` is a no-op everywhere. On Linux the priority maps to a per-thread
/// nice value; elsewhere anything but `Normal` reports `Unsupported`.
#[cfg(target_os = "linux")]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn apply_to_current_thread(priority: ThreadPriority) -> io::Result<()> {
    if priority == ThreadPriority::Normal {
        return Ok(());
    }

    // SAFETY: gettid takes no arguments and cannot fail.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    // SAFETY: setpriority only reads its scalar arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, priority.nice_value()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn apply_to_current_thread(priority: ThreadPriority) -> io::Result<()> {
    if priority == ThreadPriority::Normal {
        return Ok(());
    }
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("thread priority {priority} is not supported on this platform"),
    ))
}
