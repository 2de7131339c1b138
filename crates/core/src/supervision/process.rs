//! Pid liveness checks and signal delivery via `libc`.
//!
//! Launched jobs lead their own session, so signals go to the process
//! group first and fall back to the single pid.

use std::future::Future;
use std::io;
use std::time::Duration;

/// Interval between liveness checks while waiting for an exit.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Result of a successful [`send_signal`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The process was already gone.
    NoSuchProcess,
}

/// `true` if a process with `pid` exists.
///
/// An unreaped zombie still counts as alive here; callers that own the
/// child must reap it with `try_wait` first.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only performs the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send `signal` to the process group led by `pid`, or to `pid` alone when
/// no such group exists.
pub fn send_signal(pid: i32, signal: Signal) -> io::Result<Delivery> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    }

    // SAFETY: plain syscall with a validated positive pid.
    if unsafe { libc::kill(-pid, signal.raw()) } == 0 {
        return Ok(Delivery::Delivered);
    }
    let group_err = io::Error::last_os_error();
    if group_err.raw_os_error() != Some(libc::ESRCH) {
        return Err(group_err);
    }

    // SAFETY: as above.
    if unsafe { libc::kill(pid, signal.raw()) } == 0 {
        return Ok(Delivery::Delivered);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(Delivery::NoSuchProcess)
    } else {
        Err(err)
    }
}

/// Poll `alive` until it reports `false` or `timeout` elapses.
///
/// Returns `true` if the process exited within the window.
pub async fn wait_for_exit<F, Fut>(mut alive: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !alive().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
