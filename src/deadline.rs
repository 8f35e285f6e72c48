//! Deadline-bound non-blocking I/O primitive
//!
//! Everything time-bounded in this crate (connect, read, write, TLS
//! handshake steps) is driven through this module: a non-blocking operation
//! reports readiness trouble as an explicit [`Op::WouldBlock`] value, and
//! [`run`] retries it after waiting on `poll(2)` for at most the time left
//! until one absolute deadline. A single absolute deadline, rather than a
//! per-attempt timeout, keeps repeated would-block cycles from inflating the
//! total wait.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// An absolute point in time by which an operation must complete.
///
/// The public API uses `-1.0` seconds as the documented "wait forever"
/// sentinel; any negative timeout maps to [`Deadline::Infinite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Infinite,
    At(Instant),
}

impl Deadline {
    /// Deadline `timeout` seconds from now; negative means forever.
    pub fn after(timeout: f64) -> Self {
        if timeout < 0.0 {
            Deadline::Infinite
        } else {
            Deadline::At(Instant::now() + Duration::from_secs_f64(timeout))
        }
    }

    /// Time left, or `None` for an infinite deadline. A past deadline
    /// reports `Some(ZERO)`.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Deadline::Infinite => None,
            Deadline::At(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }
}

/// Readiness direction a blocked operation is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Tri-state outcome of one non-blocking attempt. Hard errors travel in the
/// surrounding `io::Result`.
#[derive(Debug)]
pub enum Op<T> {
    Ready(T),
    WouldBlock(Direction),
}

/// Failure of a deadline-bound operation
#[derive(Debug, thiserror::Error)]
pub enum DeadlineError {
    /// The deadline elapsed before the operation completed
    #[error("deadline elapsed")]
    Elapsed,

    /// A hard error from the operation or from `poll(2)`; the caller
    /// classifies it
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Drive a non-blocking operation to completion under one deadline.
///
/// `op` is invoked immediately; on `WouldBlock` the handle is polled for
/// readiness in the reported direction and `op` is retried. `EINTR` retries
/// the operation without consuming the deadline logic.
pub fn run<T>(
    fd: RawFd,
    deadline: Deadline,
    mut op: impl FnMut() -> io::Result<Op<T>>,
) -> Result<T, DeadlineError> {
    loop {
        match op() {
            Ok(Op::Ready(value)) => return Ok(value),
            Ok(Op::WouldBlock(direction)) => wait_ready(fd, direction, deadline)?,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DeadlineError::Io(e)),
        }
    }
}

/// Block until `fd` is ready in `direction` or the deadline elapses.
///
/// Exposed separately for drivers that cannot express their operation as a
/// single closure, such as the TLS handshake state machine.
pub fn wait_ready(fd: RawFd, direction: Direction, deadline: Deadline) -> Result<(), DeadlineError> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    loop {
        let timeout_ms = match deadline.remaining() {
            None => -1,
            Some(rem) if rem.is_zero() => return Err(DeadlineError::Elapsed),
            Some(rem) => ceil_millis(rem),
        };

        let mut pfd = pollfd {
            fd,
            events: match direction {
                Direction::Read => POLLIN,
                Direction::Write => POLLOUT,
            },
            revents: 0,
        };

        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(DeadlineError::Io(e));
        }

        if result == 0 {
            // poll timed out; the deadline math above caps the wait, so this
            // is a genuine deadline expiry.
            return Err(DeadlineError::Elapsed);
        }

        // Ready, or POLLERR/POLLHUP; either way the next attempt of the
        // operation surfaces the outcome.
        return Ok(());
    }
}

/// Zero-timeout readiness probe, used by liveness checks. Reports whether
/// `fd` is ready in `direction` right now, without waiting.
pub fn ready_now(fd: RawFd, direction: Direction) -> io::Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match direction {
            Direction::Read => POLLIN,
            Direction::Write => POLLOUT,
        },
        revents: 0,
    };

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, 0) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(result > 0)
}

/// Round up to whole milliseconds so a sub-millisecond remainder still waits
/// instead of spinning, capped to what `poll` accepts.
fn ceil_millis(duration: Duration) -> i32 {
    let millis = (duration.as_nanos() + 999_999) / 1_000_000;
    millis.min(i32::MAX as u128) as i32
}
